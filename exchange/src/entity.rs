//! Host entities lent to scripts.

use std::sync::Arc;

use uuid::Uuid;

use crate::view::View;

/// The minimal surface a host game object exposes to scripts.
pub trait HostEntity: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn name(&self) -> String;
}

/// Entities always cross the boundary as views.
pub type EntityView = View<Arc<dyn HostEntity>>;

impl View<Arc<dyn HostEntity>> {
    #[must_use]
    pub fn uuid(&self) -> Option<Uuid> {
        self.read(|entity| entity.uuid())
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.read(|entity| entity.name())
    }
}

/// A plain named entity, for hosts without a richer world model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEntity {
    uuid: Uuid,
    name: String,
}

impl NamedEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

impl HostEntity for NamedEntity {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::Revocable;

    #[test]
    fn revoked_entity_hides_identity() {
        let entity: Arc<dyn HostEntity> = Arc::new(NamedEntity::new("steve"));
        let uuid = entity.uuid();
        let view = EntityView::new(entity);
        assert_eq!(view.uuid(), Some(uuid));
        assert_eq!(view.name().as_deref(), Some("steve"));

        view.revoke();
        assert_eq!(view.uuid(), None);
        assert_eq!(view.name(), None);
    }
}
