use std::sync::atomic::{AtomicUsize, Ordering};

use marionette_types::{AllocationTracker, OutOfMemory};

/// Hard cap on bytes attributed to one avatar.
#[derive(Debug)]
pub struct AllocationLimit {
    used: AtomicUsize,
    limit: usize,
}

impl AllocationLimit {
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            limit,
        }
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

impl AllocationTracker for AllocationLimit {
    fn track(&self, bytes: usize) -> Result<(), OutOfMemory> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= self.limit)
            })
            .map(|_| ())
            .map_err(|used| OutOfMemory {
                requested: bytes,
                used,
                limit: self.limit,
            })
    }

    fn release(&self, bytes: usize) {
        let _ = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
    }
}
