//! Revocable views over lent values.
//!
//! A view owns the only path from a borrower to the lent value. Revoking it
//! drops the value and cascades to every view linked beneath it. The
//! lifecycle only moves forward: `Live -> Frozen -> Revoked`.
//!
//! Accessors never expect callers to check [`Revocable::is_revoked`] first.
//! Each one returns a sentinel (`None` or `false`) when the view is gone.
//!
//! Each view has its own lock. Revocation collects the children under the
//! lock and revokes them after releasing it, so at most one view lock is
//! held at a time during a cascade.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use marionette_types::{AllocationTracker, OutOfMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lifecycle {
    Live,
    /// Readable but no longer mutable.
    Frozen,
    Revoked,
}

/// Anything that can sit in a revocation tree.
pub trait Revocable: Send + Sync {
    fn lifecycle(&self) -> Lifecycle;

    /// Idempotent and terminal.
    fn revoke(&self);

    /// Link `child` beneath this view. Returns `false` without linking if
    /// this view is already revoked; the caller must then revoke the child.
    fn adopt(&self, child: Weak<dyn Revocable>) -> bool;

    /// Diagnostic only. Racy by nature; never use it as a pre-check.
    fn is_revoked(&self) -> bool {
        self.lifecycle() == Lifecycle::Revoked
    }
}

struct Charge {
    tracker: Arc<dyn AllocationTracker>,
    bytes: usize,
}

struct Slot<T> {
    value: Option<T>,
    lifecycle: Lifecycle,
    children: Vec<Weak<dyn Revocable>>,
    charge: Option<Charge>,
}

/// A revocable cell holding one lent value.
pub struct View<T> {
    slot: Mutex<Slot<T>>,
}

/// Root of an avatar's view tree. Revoked when the avatar is destroyed.
pub type ViewRoot = View<()>;

impl<T: Send + Sync + 'static> View<T> {
    fn build(value: T, charge: Option<Charge>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                value: Some(value),
                lifecycle: Lifecycle::Live,
                children: Vec::new(),
                charge,
            }),
        })
    }

    /// A view with no parent. Only revoked explicitly.
    pub fn new(value: T) -> Arc<Self> {
        Self::build(value, None)
    }

    /// A view that is revoked together with `parent`.
    ///
    /// If `parent` is already revoked, the returned view is revoked too.
    pub fn child_of(parent: &dyn Revocable, value: T) -> Arc<Self> {
        let view = Self::build(value, None);
        view.attach(parent);
        view
    }

    /// Like [`View::child_of`], charging `bytes` to `tracker` until the view
    /// is revoked or dropped.
    pub fn charged(
        parent: &dyn Revocable,
        value: T,
        tracker: Arc<dyn AllocationTracker>,
        bytes: usize,
    ) -> Result<Arc<Self>, OutOfMemory> {
        tracker.track(bytes)?;
        let view = Self::build(value, Some(Charge { tracker, bytes }));
        view.attach(parent);
        Ok(view)
    }

    fn attach(self: &Arc<Self>, parent: &dyn Revocable) {
        let weak: Weak<dyn Revocable> = Arc::downgrade(self) as Weak<dyn Revocable>;
        if !parent.adopt(weak) {
            self.revoke();
        }
    }
}

impl<T> View<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `read` against the value, or return `None` once revoked.
    pub fn read<R>(&self, read: impl FnOnce(&T) -> R) -> Option<R> {
        self.lock().value.as_ref().map(read)
    }

    /// Run `write` against the value, or return `None` once frozen or revoked.
    pub fn write<R>(&self, write: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut slot = self.lock();
        if slot.lifecycle != Lifecycle::Live {
            return None;
        }
        slot.value.as_mut().map(write)
    }

    #[must_use]
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.read(T::clone)
    }

    /// Idempotent. Has no effect on a revoked view.
    pub fn freeze(&self) {
        let mut slot = self.lock();
        if slot.lifecycle == Lifecycle::Live {
            slot.lifecycle = Lifecycle::Frozen;
        }
    }

    fn revoke_inner(&self) {
        let (children, value, charge) = {
            let mut slot = self.lock();
            if slot.lifecycle == Lifecycle::Revoked {
                return;
            }
            slot.lifecycle = Lifecycle::Revoked;
            (
                mem::take(&mut slot.children),
                slot.value.take(),
                slot.charge.take(),
            )
        };
        // The value may itself hold views; drop it outside the lock.
        drop(value);
        if let Some(charge) = charge {
            charge.tracker.release(charge.bytes);
        }
        for child in children {
            if let Some(child) = child.upgrade() {
                child.revoke();
            }
        }
    }
}

impl<T: Send + Sync> Revocable for View<T> {
    fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    fn revoke(&self) {
        self.revoke_inner();
    }

    fn adopt(&self, child: Weak<dyn Revocable>) -> bool {
        let mut slot = self.lock();
        if slot.lifecycle == Lifecycle::Revoked {
            return false;
        }
        slot.children.retain(|existing| existing.strong_count() > 0);
        slot.children.push(child);
        true
    }
}

impl<T> Drop for View<T> {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(charge) = slot.charge.take() {
            charge.tracker.release(charge.bytes);
        }
    }
}

impl<T> fmt::Debug for View<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.lock();
        f.debug_struct("View")
            .field("lifecycle", &slot.lifecycle)
            .field("children", &slot.children.len())
            .finish_non_exhaustive()
    }
}

/// Immutable lent string. Never frozen; only revoked.
pub type StringView = View<Arc<str>>;

impl View<Arc<str>> {
    /// Length in bytes, or `None` once revoked.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        self.read(|s| s.len())
    }

    /// An owned copy, or `None` once revoked.
    #[must_use]
    pub fn copy(&self) -> Option<String> {
        self.read(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn accessors_return_sentinels_after_revoke() {
        let view = StringView::new(Arc::from("hello"));
        assert_eq!(view.length(), Some(5));
        assert_eq!(view.copy().as_deref(), Some("hello"));

        view.revoke();
        view.revoke();
        assert!(view.is_revoked());
        assert_eq!(view.length(), None);
        assert_eq!(view.copy(), None);
    }

    #[test]
    fn frozen_view_rejects_writes_but_allows_reads() {
        let view = View::new(vec![1, 2, 3]);
        assert_eq!(view.write(|v| v.push(4)), Some(()));
        view.freeze();
        assert_eq!(view.write(|v| v.push(5)), None);
        assert_eq!(view.read(Vec::len), Some(4));
    }

    #[test]
    fn lifecycle_never_moves_backward() {
        let view = View::new(0_i32);
        view.freeze();
        assert_eq!(view.lifecycle(), Lifecycle::Frozen);
        view.revoke();
        view.freeze();
        assert_eq!(view.lifecycle(), Lifecycle::Revoked);
        assert_eq!(view.get(), None);
    }

    #[test]
    fn revocation_cascades_through_deep_chains() {
        let root = ViewRoot::new(());
        let mut chain: Vec<Arc<View<usize>>> = Vec::new();
        for depth in 0..50 {
            let view = match chain.last() {
                Some(parent) => View::child_of(&**parent, depth),
                None => View::child_of(&*root, depth),
            };
            chain.push(view);
        }

        root.revoke();

        assert!(chain.iter().all(|view| view.is_revoked()));
    }

    #[test]
    fn child_of_revoked_parent_is_born_revoked() {
        let parent = ViewRoot::new(());
        parent.revoke();
        let child = View::child_of(&*parent, 7);
        assert!(child.is_revoked());
        assert_eq!(child.get(), None);
    }

    #[test]
    fn linking_races_with_revoke_never_leave_live_children() {
        for _ in 0..200 {
            let parent = ViewRoot::new(());
            let barrier = Arc::new(Barrier::new(2));
            let linker = thread::spawn({
                let parent = Arc::clone(&parent);
                let barrier = Arc::clone(&barrier);
                move || {
                    barrier.wait();
                    View::child_of(&*parent, 1_u8)
                }
            });
            barrier.wait();
            parent.revoke();
            let child = linker.join().unwrap();
            assert!(child.is_revoked());
        }
    }

    #[test]
    fn revoking_a_child_leaves_the_parent_live() {
        let parent = ViewRoot::new(());
        let child = View::child_of(&*parent, "x");
        child.revoke();
        assert!(!parent.is_revoked());
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl AllocationTracker for Counter {
        fn track(&self, bytes: usize) -> Result<(), OutOfMemory> {
            self.0.fetch_add(bytes, Ordering::SeqCst);
            Ok(())
        }
        fn release(&self, bytes: usize) {
            self.0.fetch_sub(bytes, Ordering::SeqCst);
        }
    }

    #[test]
    fn charge_is_released_on_revoke_and_on_drop() {
        let counter = Arc::new(Counter::default());
        let root = ViewRoot::new(());
        let revoked = View::charged(&*root, 1, counter.clone(), 32).unwrap();
        let dropped = View::charged(&*root, 2, counter.clone(), 16).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 48);

        revoked.revoke();
        assert_eq!(counter.0.load(Ordering::SeqCst), 16);
        drop(dropped);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
