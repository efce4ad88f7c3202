//! List and map views.
//!
//! A collection view is two views: the slot holding the backing storage and,
//! beneath it, an anchor for views created while reading elements out. So
//! revoking the collection also revokes every element view it handed out.
//!
//! Ill-typed data is blamed on whoever supplied it. A value or key passed in
//! by the accessor that does not fit is returned as [`ViewError::Mismatch`].
//! Stored contents that fail conversion on the way out are the lender's
//! fault: the lender is marked errored, the view is revoked, and the
//! accessor sees the revoked sentinel.

use std::fmt;
use std::sync::{Arc, Weak};

use marionette_types::ConversionFault;
use thiserror::Error;

use crate::item::CallbackItem;
use crate::lender::Lender;
use crate::ty::CallbackType;
use crate::view::{Lifecycle, Revocable, View};

/// Caller misuse of a view. Revocation alone is never an error for
/// collections; it yields a sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Mismatch(#[from] ConversionFault),
    #[error("callback has been revoked")]
    Revoked,
}

/// Which side supplied a datum that failed conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingFault {
    Accessor(ConversionFault),
    Lender(ConversionFault),
}

/// Indexable storage behind a [`ListView`].
///
/// `get` failures are blamed on the lender; `set` failures on the accessor.
pub trait ListBacking: Send + Sync {
    fn len(&self) -> usize;

    fn get(
        &self,
        index: usize,
        element: &CallbackType,
        contents: &Lender,
    ) -> Result<CallbackItem, ConversionFault>;

    /// `item` has already been checked against the element type.
    fn set(&mut self, index: usize, item: CallbackItem) -> Result<(), ConversionFault>;
}

/// Keyed storage behind a [`MapView`].
pub trait MapBacking: Send + Sync {
    fn len(&self) -> usize;

    fn get(
        &self,
        key: &CallbackItem,
        value: &CallbackType,
        contents: &Lender,
    ) -> Result<Option<CallbackItem>, BackingFault>;

    fn put(&mut self, key: CallbackItem, value: CallbackItem) -> Result<(), ConversionFault>;

    /// Returns whether an entry was removed.
    fn remove(&mut self, key: &CallbackItem) -> Result<bool, ConversionFault>;
}

/// Host lists already hold typed items.
impl ListBacking for Vec<CallbackItem> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get(
        &self,
        index: usize,
        element: &CallbackType,
        _contents: &Lender,
    ) -> Result<CallbackItem, ConversionFault> {
        let item = self[index].clone();
        if item.matches(element) {
            Ok(item)
        } else {
            Err(ConversionFault::mismatch(element.to_string(), item.kind().to_string()))
        }
    }

    fn set(&mut self, index: usize, item: CallbackItem) -> Result<(), ConversionFault> {
        self[index] = item;
        Ok(())
    }
}

/// Association list keyed by [`CallbackItem::same_value`].
#[derive(Debug, Default, Clone)]
pub struct HostMap {
    entries: Vec<(CallbackItem, CallbackItem)>,
}

impl HostMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &CallbackItem) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.same_value(key))
    }

    pub fn insert(&mut self, key: CallbackItem, value: CallbackItem) {
        match self.position(&key) {
            Some(index) => self.entries[index].1 = value,
            None => self.entries.push((key, value)),
        }
    }
}

impl FromIterator<(CallbackItem, CallbackItem)> for HostMap {
    fn from_iter<I: IntoIterator<Item = (CallbackItem, CallbackItem)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl MapBacking for HostMap {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(
        &self,
        key: &CallbackItem,
        value: &CallbackType,
        _contents: &Lender,
    ) -> Result<Option<CallbackItem>, BackingFault> {
        let Some(index) = self.position(key) else {
            return Ok(None);
        };
        let item = self.entries[index].1.clone();
        if item.matches(value) {
            Ok(Some(item))
        } else {
            Err(BackingFault::Lender(ConversionFault::mismatch(
                value.to_string(),
                item.kind().to_string(),
            )))
        }
    }

    fn put(&mut self, key: CallbackItem, value: CallbackItem) -> Result<(), ConversionFault> {
        self.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &CallbackItem) -> Result<bool, ConversionFault> {
        Ok(self
            .position(key)
            .map(|index| self.entries.remove(index))
            .is_some())
    }
}

fn check(item: &CallbackItem, ty: &CallbackType) -> Result<(), ViewError> {
    if item.matches(ty) {
        Ok(())
    } else {
        Err(ViewError::Mismatch(ConversionFault::mismatch(
            ty.to_string(),
            item.kind().to_string(),
        )))
    }
}

pub struct ListView {
    element: CallbackType,
    slot: Arc<View<Box<dyn ListBacking>>>,
    contents: Lender,
}

impl ListView {
    pub(crate) fn new(
        element: CallbackType,
        slot: Arc<View<Box<dyn ListBacking>>>,
        contents: Lender,
    ) -> Self {
        Self {
            element,
            slot,
            contents,
        }
    }

    #[must_use]
    pub fn element_type(&self) -> &CallbackType {
        &self.element
    }

    /// `None` once revoked.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        self.slot.read(|backing| backing.len())
    }

    /// `Ok(None)` once revoked. Out of range is an error, not a sentinel.
    pub fn get(&self, index: usize) -> Result<Option<CallbackItem>, ViewError> {
        let outcome = self.slot.read(|backing| {
            let len = backing.len();
            if index >= len {
                return Err(ViewError::OutOfRange { index, len });
            }
            Ok(backing.get(index, &self.element, &self.contents))
        });
        match outcome {
            None => Ok(None),
            Some(Err(err)) => Err(err),
            Some(Ok(Ok(item))) => Ok(Some(item)),
            Some(Ok(Err(fault))) => {
                tracing::debug!(index, error = %fault, "Lent list element failed conversion");
                self.contents.blame(fault);
                self.revoke();
                Ok(None)
            }
        }
    }

    /// `Ok(false)` once frozen or revoked.
    pub fn set(&self, index: usize, item: CallbackItem) -> Result<bool, ViewError> {
        check(&item, &self.element)?;
        let outcome = self.slot.write(|backing| {
            let len = backing.len();
            if index >= len {
                return Err(ViewError::OutOfRange { index, len });
            }
            backing.set(index, item).map_err(ViewError::from)
        });
        outcome.map_or(Ok(false), |result| result.map(|()| true))
    }

    pub fn freeze(&self) {
        self.slot.freeze();
    }
}

impl Revocable for ListView {
    fn lifecycle(&self) -> Lifecycle {
        self.slot.lifecycle()
    }

    fn revoke(&self) {
        self.slot.revoke();
    }

    fn adopt(&self, child: Weak<dyn Revocable>) -> bool {
        self.slot.adopt(child)
    }
}

impl fmt::Debug for ListView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListView")
            .field("element", &self.element.to_string())
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

pub struct MapView {
    key: CallbackType,
    value: CallbackType,
    slot: Arc<View<Box<dyn MapBacking>>>,
    contents: Lender,
}

impl MapView {
    pub(crate) fn new(
        key: CallbackType,
        value: CallbackType,
        slot: Arc<View<Box<dyn MapBacking>>>,
        contents: Lender,
    ) -> Self {
        Self {
            key,
            value,
            slot,
            contents,
        }
    }

    #[must_use]
    pub fn key_type(&self) -> &CallbackType {
        &self.key
    }

    #[must_use]
    pub fn value_type(&self) -> &CallbackType {
        &self.value
    }

    /// `None` once revoked.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        self.slot.read(|backing| backing.len())
    }

    /// `Ok(None)` if revoked or absent.
    pub fn get(&self, key: &CallbackItem) -> Result<Option<CallbackItem>, ViewError> {
        check(key, &self.key)?;
        match self
            .slot
            .read(|backing| backing.get(key, &self.value, &self.contents))
        {
            None => Ok(None),
            Some(Ok(item)) => Ok(item),
            Some(Err(BackingFault::Accessor(fault))) => Err(ViewError::Mismatch(fault)),
            Some(Err(BackingFault::Lender(fault))) => {
                tracing::debug!(error = %fault, "Lent map value failed conversion");
                self.contents.blame(fault);
                self.revoke();
                Ok(None)
            }
        }
    }

    /// `Ok(false)` once frozen or revoked.
    pub fn put(&self, key: CallbackItem, value: CallbackItem) -> Result<bool, ViewError> {
        check(&key, &self.key)?;
        check(&value, &self.value)?;
        self.slot
            .write(|backing| backing.put(key, value))
            .map_or(Ok(false), |result| result.map(|()| true).map_err(ViewError::from))
    }

    /// Whether an entry was removed. `Ok(false)` once frozen or revoked.
    pub fn remove(&self, key: &CallbackItem) -> Result<bool, ViewError> {
        check(key, &self.key)?;
        self.slot
            .write(|backing| backing.remove(key))
            .map_or(Ok(false), |result| result.map_err(ViewError::from))
    }

    pub fn freeze(&self) {
        self.slot.freeze();
    }
}

impl Revocable for MapView {
    fn lifecycle(&self) -> Lifecycle {
        self.slot.lifecycle()
    }

    fn revoke(&self) {
        self.slot.revoke();
    }

    fn adopt(&self, child: Weak<dyn Revocable>) -> bool {
        self.slot.adopt(child)
    }
}

impl fmt::Debug for MapView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapView")
            .field("key", &self.key.to_string())
            .field("value", &self.value.to_string())
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_types::{AvatarError, AvatarFailure, ThreadSafety};

    use crate::testing::Recorder;
    use crate::view::ViewRoot;

    fn host() -> Lender {
        Lender::host(ViewRoot::new(()))
    }

    fn int_list(lender: &Lender, values: &[i32]) -> Arc<ListView> {
        let items = values.iter().copied().map(CallbackItem::I32).collect::<Vec<_>>();
        match lender.lend_list(CallbackType::I32, Box::new(items)).unwrap() {
            CallbackItem::List(list) => list,
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn list_reads_and_writes_while_live() {
        let list = int_list(&host(), &[1, 2, 3]);
        assert_eq!(list.length(), Some(3));
        assert_eq!(list.get(1), Ok(Some(CallbackItem::I32(2))));
        assert_eq!(list.set(1, CallbackItem::I32(20)), Ok(true));
        assert_eq!(list.get(1), Ok(Some(CallbackItem::I32(20))));
    }

    #[test]
    fn list_out_of_range_is_an_error() {
        let list = int_list(&host(), &[1]);
        assert_eq!(list.get(5), Err(ViewError::OutOfRange { index: 5, len: 1 }));
        assert_eq!(
            list.set(1, CallbackItem::I32(0)),
            Err(ViewError::OutOfRange { index: 1, len: 1 })
        );
    }

    #[test]
    fn list_set_rejects_ill_typed_item() {
        let list = int_list(&host(), &[1]);
        assert_eq!(
            list.set(0, CallbackItem::Bool(true)),
            Err(ViewError::Mismatch(ConversionFault::mismatch("i32", "bool")))
        );
    }

    #[test]
    fn frozen_list_rejects_set_then_revoked_rejects_everything() {
        let list = int_list(&host(), &[1, 2]);
        list.freeze();
        assert_eq!(list.set(0, CallbackItem::I32(9)), Ok(false));
        assert_eq!(list.get(0), Ok(Some(CallbackItem::I32(1))));
        assert_eq!(list.lifecycle(), Lifecycle::Frozen);

        list.revoke();
        list.freeze();
        assert_eq!(list.lifecycle(), Lifecycle::Revoked);
        assert_eq!(list.length(), None);
        assert_eq!(list.get(0), Ok(None));
        assert_eq!(list.set(0, CallbackItem::I32(9)), Ok(false));
    }

    #[test]
    fn ill_typed_lent_contents_blame_the_lender() {
        let recorder = Recorder::arc(ThreadSafety::Unsafe);
        let root = ViewRoot::new(());
        let lender = Lender::avatar(root, recorder.limit(), recorder.weak());
        // A backing whose stored item does not match the declared element type.
        let item = lender
            .lend_list(CallbackType::I32, Box::new(vec![CallbackItem::Bool(true)]))
            .unwrap();
        let CallbackItem::List(list) = item else {
            panic!("expected list");
        };

        assert_eq!(list.get(0), Ok(None));
        assert!(list.is_revoked());
        assert_eq!(
            recorder.failures(),
            vec![AvatarFailure::Domain(AvatarError::Conversion(
                ConversionFault::mismatch("i32", "bool")
            ))]
        );
    }

    #[test]
    fn revoked_list_stops_serving_elements() {
        let lender = host();
        let strings = vec![lender.lend_str("a").unwrap()];
        let CallbackItem::List(list) = lender
            .lend_list(CallbackType::Str, Box::new(strings))
            .unwrap()
        else {
            panic!("expected list");
        };
        let Ok(Some(CallbackItem::Str(element))) = list.get(0) else {
            panic!("expected string element");
        };
        assert_eq!(element.copy().as_deref(), Some("a"));

        list.revoke();
        assert_eq!(list.get(0), Ok(None));
    }

    fn string_map(lender: &Lender) -> Arc<MapView> {
        let map: HostMap = [
            (lender.lend_str("one").unwrap(), CallbackItem::I32(1)),
            (lender.lend_str("two").unwrap(), CallbackItem::I32(2)),
        ]
        .into_iter()
        .collect();
        match lender
            .lend_map(CallbackType::Str, CallbackType::I32, Box::new(map))
            .unwrap()
        {
            CallbackItem::Map(map) => map,
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn map_looks_up_strings_by_content() {
        let lender = host();
        let map = string_map(&lender);
        let key = lender.lend_str("two").unwrap();
        assert_eq!(map.size(), Some(2));
        assert_eq!(map.get(&key), Ok(Some(CallbackItem::I32(2))));
        assert_eq!(map.get(&lender.lend_str("three").unwrap()), Ok(None));
    }

    #[test]
    fn map_mutation_follows_lifecycle() {
        let lender = host();
        let map = string_map(&lender);
        let three = lender.lend_str("three").unwrap();
        assert_eq!(map.put(three.clone(), CallbackItem::I32(3)), Ok(true));
        assert_eq!(map.size(), Some(3));
        assert_eq!(map.remove(&three), Ok(true));
        assert_eq!(map.remove(&three), Ok(false));

        map.freeze();
        assert_eq!(map.put(three.clone(), CallbackItem::I32(3)), Ok(false));
        assert_eq!(map.size(), Some(2));

        map.revoke();
        assert_eq!(map.size(), None);
        assert_eq!(map.get(&three), Ok(None));
        assert_eq!(map.remove(&three), Ok(false));
    }

    #[test]
    fn map_rejects_ill_typed_keys_and_values() {
        let lender = host();
        let map = string_map(&lender);
        assert_eq!(
            map.get(&CallbackItem::I32(1)),
            Err(ViewError::Mismatch(ConversionFault::mismatch("string", "i32")))
        );
        assert_eq!(
            map.put(lender.lend_str("x").unwrap(), CallbackItem::F32(1.0)),
            Err(ViewError::Mismatch(ConversionFault::mismatch("i32", "f32")))
        );
    }
}
