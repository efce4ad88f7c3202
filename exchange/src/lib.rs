//! Moving values between the host and sandboxed scripts.
//!
//! - [`CallbackType`] describes the shape of an exchanged value and
//!   [`CallbackItem`] is a value of that shape.
//! - Reference values (strings, lists, maps, entities, functions) always
//!   travel as revocable views created by a [`Lender`].
//! - A [`Converter`] per script engine maps native values to items and
//!   back, following the positional calling convention in [`convert`].
//! - [`EventRegistry`] and [`EventListener`] deliver named events to the
//!   callbacks an avatar registered.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod callback;
mod collections;
pub mod convert;
mod entity;
mod event;
mod item;
mod lender;
mod parse;
mod ty;
mod view;

#[cfg(test)]
mod testing;

pub use callback::{FuncView, NativeCallback, ScriptCallback};
pub use collections::{BackingFault, HostMap, ListBacking, ListView, MapBacking, MapView, ViewError};
pub use convert::Converter;
pub use entity::{EntityView, HostEntity, NamedEntity};
pub use event::{
    Event, EventError, EventId, EventListener, EventRegistry, EventRegistryBuilder, QueueError,
    Registration, StandardEvents,
};
pub use item::CallbackItem;
pub use lender::Lender;
pub use parse::TypeParseError;
pub use ty::{
    CallbackType, FuncType, OBJECT_SIZE, REFERENCE_SIZE, TupleArityError, TupleType, TypeKind,
};
pub use view::{Lifecycle, Revocable, StringView, View, ViewRoot};
