//! Core domain types for Marionette.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer: the runtime, the value exchange
//! protocol, and individual script engine bindings.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod alloc;
mod avatar;
mod error;
mod profiling;

pub use alloc::{AllocationTracker, OutOfMemory};
pub use avatar::{Avatar, ErrorReporter, ProfilingSink, ThreadSafety};
pub use error::{AvatarError, AvatarFailure, ConversionFault, UnexpectedError};
pub use profiling::{
    Category, CategoryError, CategoryId, ProfilingCategories, ProfilingCategoriesBuilder,
    StandardCategories,
};
