//! Hierarchical profiling categories.
//!
//! The set of categories is assembled once through a builder and then
//! frozen; the finished [`ProfilingCategories`] is passed by reference to
//! whatever needs it. There is no global registry.

use std::convert::Infallible;
use std::fmt;

use thiserror::Error;

/// Samples kept per category unless registered otherwise.
pub const DEFAULT_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryId(u16);

impl CategoryId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "category#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    name: String,
    full_name: String,
    parent: Option<CategoryId>,
    children: Vec<CategoryId>,
    window: usize,
}

impl Category {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slash-separated path from the root, e.g. `ticking/scripts/client_tick`.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    #[must_use]
    pub fn parent(&self) -> Option<CategoryId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[CategoryId] {
        &self.children
    }

    /// Number of recent samples a measurer keeps for this category.
    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CategoryError {
    #[error("duplicate profiling category: {0}")]
    Duplicate(String),
    #[error("invalid profiling category name: {0:?}")]
    InvalidName(String),
    #[error("unknown parent {0}")]
    UnknownParent(CategoryId),
    #[error("sample window must be at least 1")]
    EmptyWindow,
    #[error("too many profiling categories")]
    Exhausted,
}

#[derive(Debug, Default)]
pub struct ProfilingCategoriesBuilder {
    categories: Vec<Category>,
}

impl ProfilingCategoriesBuilder {
    pub fn root(&mut self, name: &str) -> Result<CategoryId, CategoryError> {
        self.insert(None, name, DEFAULT_WINDOW)
    }

    pub fn child(&mut self, parent: CategoryId, name: &str) -> Result<CategoryId, CategoryError> {
        self.insert(Some(parent), name, DEFAULT_WINDOW)
    }

    /// Register with a non-default sample window.
    pub fn child_with_window(
        &mut self,
        parent: Option<CategoryId>,
        name: &str,
        window: usize,
    ) -> Result<CategoryId, CategoryError> {
        self.insert(parent, name, window)
    }

    fn insert(
        &mut self,
        parent: Option<CategoryId>,
        name: &str,
        window: usize,
    ) -> Result<CategoryId, CategoryError> {
        if name.is_empty() || name.contains('/') {
            return Err(CategoryError::InvalidName(name.to_string()));
        }
        if window == 0 {
            return Err(CategoryError::EmptyWindow);
        }
        if let Some(parent) = parent
            && self.categories.get(parent.index()).is_none()
        {
            return Err(CategoryError::UnknownParent(parent));
        }
        let full_name = self.full_name_of(parent, name);
        if self.categories.iter().any(|c| c.full_name == full_name) {
            return Err(CategoryError::Duplicate(full_name));
        }
        if u16::try_from(self.categories.len()).is_err() {
            return Err(CategoryError::Exhausted);
        }
        Ok(self.push(parent, name, window))
    }

    fn full_name_of(&self, parent: Option<CategoryId>, name: &str) -> String {
        match parent.and_then(|parent| self.categories.get(parent.index())) {
            Some(parent) => format!("{}/{name}", parent.full_name),
            None => name.to_string(),
        }
    }

    /// Append without validation. Callers have checked the name, window,
    /// parent and id space.
    fn push(&mut self, parent: Option<CategoryId>, name: &str, window: usize) -> CategoryId {
        let id = CategoryId(self.categories.len() as u16);
        self.categories.push(Category {
            name: name.to_string(),
            full_name: self.full_name_of(parent, name),
            parent,
            children: Vec::new(),
            window,
        });
        if let Some(parent) = parent.and_then(|p| self.categories.get_mut(p.index())) {
            parent.children.push(id);
        }
        id
    }

    #[must_use]
    pub fn build(self) -> ProfilingCategories {
        ProfilingCategories {
            categories: self.categories,
        }
    }
}

/// Frozen category tree. Ids handed out by the builder index into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilingCategories {
    categories: Vec<Category>,
}

impl ProfilingCategories {
    #[must_use]
    pub fn builder() -> ProfilingCategoriesBuilder {
        ProfilingCategoriesBuilder::default()
    }

    /// The standard tree used by scripted avatars.
    #[must_use]
    pub fn standard() -> (Self, StandardCategories) {
        let mut builder = Self::builder();
        // The standard names are valid and distinct, so a fresh builder
        // needs no checks.
        let Ok(ids) = StandardCategories::layout(|parent, name, window| {
            Ok::<_, Infallible>(builder.push(parent, name, window))
        });
        (builder.build(), ids)
    }

    #[must_use]
    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(id.index())
    }

    /// Full name for an id, or a placeholder for ids from another registry.
    #[must_use]
    pub fn full_name(&self, id: CategoryId) -> String {
        self.get(id)
            .map(|c| c.full_name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    #[must_use]
    pub fn find(&self, full_name: &str) -> Option<CategoryId> {
        self.categories
            .iter()
            .position(|c| c.full_name == full_name)
            .map(|index| CategoryId(index as u16))
    }

    pub fn roots(&self) -> impl Iterator<Item = CategoryId> + '_ {
        self.iter().filter(|(_, c)| c.parent.is_none()).map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &Category)> {
        self.categories
            .iter()
            .enumerate()
            .map(|(index, c)| (CategoryId(index as u16), c))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Well-known ids in the standard tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardCategories {
    pub initialization: CategoryId,
    pub ticking: CategoryId,
    pub client_tick: CategoryId,
    pub world_tick: CategoryId,
    pub entity_tick: CategoryId,
    pub rendering: CategoryId,
    pub drawing: CategoryId,
    pub client_render: CategoryId,
    pub world_render: CategoryId,
    pub entity_render: CategoryId,
    pub callback: CategoryId,
    pub events: CategoryId,
}

impl StandardCategories {
    /// Register the standard tree into a builder that may already hold
    /// host-specific categories.
    pub fn register(builder: &mut ProfilingCategoriesBuilder) -> Result<Self, CategoryError> {
        Self::layout(|parent, name, window| builder.insert(parent, name, window))
    }

    fn layout<E>(
        mut add: impl FnMut(Option<CategoryId>, &str, usize) -> Result<CategoryId, E>,
    ) -> Result<Self, E> {
        // One sample: initialization happens once.
        let initialization = add(None, "initialization", 1)?;
        let window = DEFAULT_WINDOW;

        let ticking = add(None, "ticking", window)?;
        let tick_scripts = add(Some(ticking), "scripts", window)?;
        let client_tick = add(Some(tick_scripts), "client_tick", window)?;
        let world_tick = add(Some(tick_scripts), "world_tick", window)?;
        let entity_tick = add(Some(tick_scripts), "entity_tick", window)?;

        let rendering = add(None, "rendering", window)?;
        let drawing = add(Some(rendering), "drawing", window)?;
        let render_scripts = add(Some(rendering), "scripts", window)?;
        let client_render = add(Some(render_scripts), "client_render", window)?;
        let world_render = add(Some(render_scripts), "world_render", window)?;
        let entity_render = add(Some(render_scripts), "entity_render", window)?;

        let scripts = add(None, "scripts", window)?;
        let callback = add(Some(scripts), "callback", window)?;
        let events = add(Some(scripts), "events", window)?;

        Ok(Self {
            initialization,
            ticking,
            client_tick,
            world_tick,
            entity_tick,
            rendering,
            drawing,
            client_render,
            world_render,
            entity_render,
            callback,
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_tree_has_expected_paths() {
        let (categories, ids) = ProfilingCategories::standard();
        assert_eq!(
            categories.full_name(ids.client_tick),
            "ticking/scripts/client_tick"
        );
        assert_eq!(
            categories.full_name(ids.entity_render),
            "rendering/scripts/entity_render"
        );
        assert_eq!(categories.find("rendering/drawing"), Some(ids.drawing));
        assert_eq!(categories.find("ticking/nope"), None);
    }

    #[test]
    fn initialization_keeps_a_single_sample() {
        let (categories, ids) = ProfilingCategories::standard();
        assert_eq!(categories.get(ids.initialization).map(Category::window), Some(1));
        assert_eq!(
            categories.get(ids.client_tick).map(Category::window),
            Some(DEFAULT_WINDOW)
        );
    }

    #[test]
    fn parents_know_their_children() {
        let (categories, ids) = ProfilingCategories::standard();
        let rendering = categories.get(ids.rendering).unwrap();
        assert_eq!(rendering.children().len(), 2);
        assert!(rendering.children().contains(&ids.drawing));
        assert_eq!(
            categories.get(ids.drawing).and_then(Category::parent),
            Some(ids.rendering)
        );

        let roots: Vec<_> = categories.roots().collect();
        assert_eq!(
            roots,
            vec![ids.initialization, ids.ticking, ids.rendering, categories.find("scripts").unwrap()]
        );
    }

    #[test]
    fn duplicate_full_names_rejected() {
        let mut builder = ProfilingCategories::builder();
        let a = builder.root("a").unwrap();
        builder.child(a, "b").unwrap();
        assert_eq!(
            builder.child(a, "b"),
            Err(CategoryError::Duplicate("a/b".to_string()))
        );
        // Same leaf name under a different parent is fine.
        let c = builder.root("c").unwrap();
        assert!(builder.child(c, "b").is_ok());
    }

    #[test]
    fn invalid_names_rejected() {
        let mut builder = ProfilingCategories::builder();
        assert!(matches!(builder.root(""), Err(CategoryError::InvalidName(_))));
        assert!(matches!(builder.root("a/b"), Err(CategoryError::InvalidName(_))));
        assert_eq!(
            builder.child_with_window(None, "x", 0),
            Err(CategoryError::EmptyWindow)
        );
    }

    #[test]
    fn standard_registration_conflicts_with_existing_names() {
        let mut builder = ProfilingCategories::builder();
        builder.root("ticking").unwrap();
        assert!(StandardCategories::register(&mut builder).is_err());
    }

    #[test]
    fn standard_tree_matches_checked_registration() {
        let (standard, ids) = ProfilingCategories::standard();
        let mut builder = ProfilingCategories::builder();
        let checked = StandardCategories::register(&mut builder).unwrap();
        assert_eq!(checked, ids);
        assert_eq!(builder.build(), standard);
    }
}
