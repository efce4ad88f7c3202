//! Creating views on behalf of whoever owns the lent value.

use std::fmt;
use std::sync::{Arc, Weak};

use marionette_types::{AllocationTracker, Avatar, ConversionFault};

use crate::callback::{FuncView, ScriptCallback};
use crate::collections::{ListBacking, ListView, MapBacking, MapView};
use crate::entity::{EntityView, HostEntity};
use crate::item::CallbackItem;
use crate::ty::{CallbackType, OBJECT_SIZE, REFERENCE_SIZE};
use crate::view::{Revocable, StringView, View};

/// The side that lends values: where new views are anchored, what they are
/// charged to, and who is blamed when lent contents turn out ill-typed.
///
/// An avatar's lender anchors at the avatar's view root, so destroying the
/// avatar revokes everything it ever lent.
#[derive(Clone)]
pub struct Lender {
    anchor: Arc<dyn Revocable>,
    tracker: Option<Arc<dyn AllocationTracker>>,
    avatar: Option<Weak<dyn Avatar>>,
}

impl Lender {
    /// Host-owned values: uncharged and never blamed on an avatar.
    pub fn host(anchor: Arc<dyn Revocable>) -> Self {
        Self {
            anchor,
            tracker: None,
            avatar: None,
        }
    }

    pub fn avatar(
        anchor: Arc<dyn Revocable>,
        tracker: Arc<dyn AllocationTracker>,
        avatar: Weak<dyn Avatar>,
    ) -> Self {
        Self {
            anchor,
            tracker: Some(tracker),
            avatar: Some(avatar),
        }
    }

    /// Same owner and tracker, anchored somewhere else.
    #[must_use]
    pub fn beneath(&self, anchor: Arc<dyn Revocable>) -> Self {
        Self {
            anchor,
            tracker: self.tracker.clone(),
            avatar: self.avatar.clone(),
        }
    }

    #[must_use]
    pub fn anchor(&self) -> &Arc<dyn Revocable> {
        &self.anchor
    }

    /// The avatar this lender belongs to, if it is still alive.
    #[must_use]
    pub fn owner(&self) -> Option<Arc<dyn Avatar>> {
        self.avatar.as_ref().and_then(Weak::upgrade)
    }

    /// Mark the lending avatar errored for lent contents it got wrong.
    pub fn blame(&self, fault: ConversionFault) {
        match self.owner() {
            Some(avatar) => avatar.error(fault.into()),
            None => tracing::warn!(error = %fault, "Host-lent value failed conversion"),
        }
    }

    fn view<T: Send + Sync + 'static>(
        &self,
        value: T,
        bytes: usize,
    ) -> Result<Arc<View<T>>, ConversionFault> {
        match &self.tracker {
            Some(tracker) => Ok(View::charged(&*self.anchor, value, Arc::clone(tracker), bytes)?),
            None => Ok(View::child_of(&*self.anchor, value)),
        }
    }

    pub fn lend_str(&self, s: impl Into<Arc<str>>) -> Result<CallbackItem, ConversionFault> {
        let s: Arc<str> = s.into();
        let bytes = OBJECT_SIZE + s.len();
        let view: Arc<StringView> = self.view(s, bytes)?;
        Ok(CallbackItem::Str(view))
    }

    pub fn lend_entity(&self, entity: Arc<dyn HostEntity>) -> Result<CallbackItem, ConversionFault> {
        let view: Arc<EntityView> = self.view(entity, OBJECT_SIZE + REFERENCE_SIZE)?;
        Ok(CallbackItem::Entity(view))
    }

    pub fn lend_list(
        &self,
        element: CallbackType,
        backing: Box<dyn ListBacking>,
    ) -> Result<CallbackItem, ConversionFault> {
        let bytes = OBJECT_SIZE + REFERENCE_SIZE + element.footprint();
        let slot = self.view(backing, bytes)?;
        let contents = self.beneath(View::child_of(&*slot, ()));
        Ok(CallbackItem::List(Arc::new(ListView::new(element, slot, contents))))
    }

    pub fn lend_map(
        &self,
        key: CallbackType,
        value: CallbackType,
        backing: Box<dyn MapBacking>,
    ) -> Result<CallbackItem, ConversionFault> {
        let bytes = OBJECT_SIZE + 2 * REFERENCE_SIZE + key.footprint() + value.footprint();
        let slot = self.view(backing, bytes)?;
        let contents = self.beneath(View::child_of(&*slot, ()));
        Ok(CallbackItem::Map(Arc::new(MapView::new(key, value, slot, contents))))
    }

    pub fn lend_func(
        &self,
        callback: Arc<dyn ScriptCallback>,
    ) -> Result<CallbackItem, ConversionFault> {
        let signature = callback.signature().clone();
        let bytes = OBJECT_SIZE
            + REFERENCE_SIZE
            + signature.param().footprint()
            + signature.ret().footprint();
        let slot = self.view(callback, bytes)?;
        Ok(CallbackItem::Func(Arc::new(FuncView::new(signature, slot))))
    }
}

impl fmt::Debug for Lender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lender")
            .field("charged", &self.tracker.is_some())
            .field("avatar", &self.avatar.is_some())
            .finish_non_exhaustive()
    }
}
