//! The avatar contract and the sinks an avatar reports into.

use std::any::{Any, TypeId};
use std::fmt;
use std::time::Duration;

use crate::error::{AvatarError, AvatarFailure, UnexpectedError};
use crate::profiling::CategoryId;

/// Declared once at construction; never changes for the avatar's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadSafety {
    /// Internal state tolerates concurrent access by construction.
    Safe,
    /// Every operation must hold the avatar's exclusive lock.
    Unsafe,
}

impl ThreadSafety {
    #[must_use]
    pub const fn is_safe(self) -> bool {
        matches!(self, ThreadSafety::Safe)
    }
}

impl fmt::Display for ThreadSafety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadSafety::Safe => f.write_str("thread-safe"),
            ThreadSafety::Unsafe => f.write_str("thread-unsafe"),
        }
    }
}

/// A keyed, script-driven unit of state.
///
/// The key lives with whoever owns the avatar (the registry), not on the
/// avatar itself.
pub trait Avatar: Send + Sync + 'static {
    fn thread_safety(&self) -> ThreadSafety;

    /// Two-phase construction: an avatar may exist before it is usable.
    fn is_ready(&self) -> bool {
        true
    }

    fn is_errored(&self) -> bool;

    /// Record a failure. Only the first one sticks; later calls are ignored.
    fn error(&self, failure: AvatarFailure);

    /// Profiling is still collected after the avatar errors.
    fn profiler(&self) -> Option<&dyn ProfilingSink> {
        None
    }

    /// Returns `None` once the avatar is errored.
    fn component(&self, _component: TypeId) -> Option<&(dyn Any + Send + Sync)> {
        None
    }

    fn destroy(&self);
}

impl dyn Avatar {
    #[must_use]
    pub fn component_of<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.component(TypeId::of::<T>())
            .and_then(|component| component.downcast_ref::<T>())
    }

    pub fn fail(&self, error: AvatarError) {
        self.error(AvatarFailure::Domain(error));
    }
}

/// Where avatar failures end up. Both methods must be non-blocking.
pub trait ErrorReporter: Send + Sync {
    fn report_error(&self, subject: &str, error: &AvatarError);

    fn report_unexpected(&self, subject: &str, error: &UnexpectedError);

    fn report(&self, subject: &str, failure: &AvatarFailure) {
        match failure {
            AvatarFailure::Domain(error) => self.report_error(subject, error),
            AvatarFailure::Unexpected(error) => self.report_unexpected(subject, error),
        }
    }
}

pub trait ProfilingSink: Send + Sync {
    fn record_time(&self, category: CategoryId, elapsed: Duration);
}
