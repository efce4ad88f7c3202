//! Memory accounting capability injected into views and converters.

use thiserror::Error;

/// An allocation was refused because it would exceed the tracker's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("allocation of {requested} bytes exceeds limit of {limit} bytes ({used} in use)")]
pub struct OutOfMemory {
    pub requested: usize,
    pub used: usize,
    pub limit: usize,
}

/// Receives allocation reports from marshaling code.
///
/// Failure is resource exhaustion and is never recoverable by the script
/// that triggered it.
pub trait AllocationTracker: Send + Sync {
    fn track(&self, bytes: usize) -> Result<(), OutOfMemory>;

    fn release(&self, bytes: usize);
}
