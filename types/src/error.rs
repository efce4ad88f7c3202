//! Failure taxonomy shared by every layer.
//!
//! Two channels exist and must stay separate:
//! - [`AvatarError`]: a recognized failure attributable to one avatar
//!   ("your script is broken").
//! - [`UnexpectedError`]: anything that does not match a recognized shape
//!   ("our host has a bug").
//!
//! [`AvatarFailure`] carries either one so a single sink can route it.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

use crate::alloc::OutOfMemory;

/// A recognized, reportable failure attributable to a specific avatar.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AvatarError {
    /// Raised exclusively by the watchdog's killer.
    #[error("exceeded {} ms budget during {category}", budget.as_millis())]
    BudgetExceeded { category: String, budget: Duration },
    #[error("script error: {0}")]
    Script(String),
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionFault),
    /// The accessing script mishandled a revoked view.
    #[error("accessed a revoked view")]
    RevokedAccess,
    /// A callee attempted to suspend across a native call boundary.
    #[error("callback attempted to suspend across a native boundary")]
    Suspended,
    #[error("initialization failed: {0}")]
    Init(String),
    #[error("avatar was unloaded")]
    Unloaded,
}

impl AvatarError {
    #[must_use]
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script(message.into())
    }

    #[must_use]
    pub const fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::BudgetExceeded { .. })
    }
}

/// Failure while moving a value across the sandbox boundary.
///
/// Attributed to whichever side is responsible for the ill-typed datum:
/// arguments belong to the invoker, returned values to the callee,
/// lent container contents to the lender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionFault {
    #[error("expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("expected {expected} argument(s), got {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("values of type any cannot be exchanged")]
    Unsupported,
    #[error("missing return value of type {0}")]
    MissingReturn(String),
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

impl ConversionFault {
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Resource exhaustion can't be handled by the script that caused it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::OutOfMemory(_))
    }
}

/// A failure that does not match any recognized domain shape.
///
/// Typically built from a panic payload or a failed task join.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected failure: {message}")]
pub struct UnexpectedError {
    message: String,
}

impl UnexpectedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extract a readable message from a `catch_unwind` / join payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self { message }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Either failure channel, routed by the receiver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AvatarFailure {
    #[error(transparent)]
    Domain(#[from] AvatarError),
    #[error(transparent)]
    Unexpected(#[from] UnexpectedError),
}

impl From<ConversionFault> for AvatarFailure {
    fn from(fault: ConversionFault) -> Self {
        Self::Domain(AvatarError::Conversion(fault))
    }
}
