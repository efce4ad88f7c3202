//! Avatar runtime: lifecycle, access, and time budgets.
//!
//! - [`AvatarRegistry`] owns loaded and in-progress avatars for one keyspace.
//! - [`AvatarHandle`] decides at construction whether access is serialized.
//! - [`Watchdog`] marks operations that overrun their wall-clock budget.
//!
//! Nothing here preempts running code. Budget enforcement and creation
//! cancellation are both detect-and-mark.

mod alloc;
mod handle;
mod profiling;
mod registry;
mod report;
mod state;
mod watchdog;

pub use alloc::AllocationLimit;
pub use handle::{AvatarHandle, ConcurrentHandle, SerializedHandle, WeakAvatarHandle};
pub use profiling::{AvatarProfiling, Measurer};
pub use registry::{AvatarRegistry, CreationResult};
pub use report::TracingReporter;
pub use state::AvatarErrorState;
pub use watchdog::{TaskId, Watchdog};
