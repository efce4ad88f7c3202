//! Test avatar that records every failure it is handed.

use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use marionette_runtime::{AllocationLimit, AvatarHandle, WeakAvatarHandle};
use marionette_types::{AllocationTracker, Avatar, AvatarFailure, ThreadSafety};

pub(crate) struct Recorder {
    safety: ThreadSafety,
    failures: Mutex<Vec<AvatarFailure>>,
    handle: OnceLock<WeakAvatarHandle<dyn Avatar>>,
}

impl Recorder {
    pub(crate) fn arc(safety: ThreadSafety) -> Arc<Self> {
        let recorder = Arc::new(Self {
            safety,
            failures: Mutex::new(Vec::new()),
            handle: OnceLock::new(),
        });
        let erased: Arc<dyn Avatar> = recorder.clone();
        let _ = recorder.handle.set(AvatarHandle::from_arc(erased).downgrade());
        recorder
    }

    /// Every clone shares one lock, as a registry-held handle would.
    pub(crate) fn handle(&self) -> AvatarHandle<dyn Avatar> {
        self.handle
            .get()
            .and_then(WeakAvatarHandle::upgrade)
            .unwrap()
    }

    pub(crate) fn weak(self: &Arc<Self>) -> Weak<dyn Avatar> {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak
    }

    pub(crate) fn limit(&self) -> Arc<dyn AllocationTracker> {
        Arc::new(AllocationLimit::new(1 << 20))
    }

    pub(crate) fn failures(&self) -> Vec<AvatarFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Avatar for Recorder {
    fn thread_safety(&self) -> ThreadSafety {
        self.safety
    }

    fn is_errored(&self) -> bool {
        !self.failures.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    fn error(&self, failure: AvatarFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    fn destroy(&self) {}
}
