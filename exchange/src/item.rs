//! Values exchanged across the sandbox boundary.

use std::fmt;
use std::sync::Arc;

use crate::callback::FuncView;
use crate::collections::{ListView, MapView};
use crate::entity::EntityView;
use crate::ty::{CallbackType, TypeKind};
use crate::view::StringView;

/// A value conforming to exactly one [`CallbackType`].
///
/// Reference variants hold views, never copies. Equality on them is
/// identity: two items are equal only if they share the same view.
#[derive(Clone)]
pub enum CallbackItem {
    Unit,
    Bool(bool),
    I32(i32),
    F32(f32),
    F64(f64),
    Str(Arc<StringView>),
    Entity(Arc<EntityView>),
    List(Arc<ListView>),
    Map(Arc<MapView>),
    Tuple(Vec<CallbackItem>),
    Optional(Option<Box<CallbackItem>>),
    Func(Arc<FuncView>),
}

impl CallbackItem {
    #[must_use]
    pub fn some(item: CallbackItem) -> Self {
        Self::Optional(Some(Box::new(item)))
    }

    #[must_use]
    pub const fn none() -> Self {
        Self::Optional(None)
    }

    #[must_use]
    pub const fn kind(&self) -> TypeKind {
        match self {
            CallbackItem::Unit => TypeKind::Unit,
            CallbackItem::Bool(_) => TypeKind::Bool,
            CallbackItem::I32(_) => TypeKind::I32,
            CallbackItem::F32(_) => TypeKind::F32,
            CallbackItem::F64(_) => TypeKind::F64,
            CallbackItem::Str(_) => TypeKind::Str,
            CallbackItem::Entity(_) => TypeKind::Entity,
            CallbackItem::List(_) => TypeKind::List,
            CallbackItem::Map(_) => TypeKind::Map,
            CallbackItem::Tuple(_) => TypeKind::Tuple,
            CallbackItem::Optional(_) => TypeKind::Optional,
            CallbackItem::Func(_) => TypeKind::Func,
        }
    }

    /// Structural conformance. Nothing conforms to `any`.
    #[must_use]
    pub fn matches(&self, ty: &CallbackType) -> bool {
        match (self, ty) {
            (CallbackItem::Unit, CallbackType::Unit)
            | (CallbackItem::Bool(_), CallbackType::Bool)
            | (CallbackItem::I32(_), CallbackType::I32)
            | (CallbackItem::F32(_), CallbackType::F32)
            | (CallbackItem::F64(_), CallbackType::F64)
            | (CallbackItem::Str(_), CallbackType::Str)
            | (CallbackItem::Entity(_), CallbackType::Entity)
            | (CallbackItem::Optional(None), CallbackType::Optional(_)) => true,
            (CallbackItem::Optional(Some(inner)), CallbackType::Optional(ty)) => inner.matches(ty),
            (CallbackItem::List(view), CallbackType::List(element)) => {
                view.element_type() == element.as_ref()
            }
            (CallbackItem::Map(view), CallbackType::Map(key, value)) => {
                view.key_type() == key.as_ref() && view.value_type() == value.as_ref()
            }
            (CallbackItem::Tuple(items), CallbackType::Tuple(tuple)) => {
                items.len() == tuple.arity()
                    && items.iter().zip(tuple.elements()).all(|(item, ty)| item.matches(ty))
            }
            (CallbackItem::Func(view), CallbackType::Func(func)) => view.signature() == func.as_ref(),
            _ => false,
        }
    }

    /// Like `==`, except live strings compare by content. Used for map keys.
    #[must_use]
    pub fn same_value(&self, other: &CallbackItem) -> bool {
        match (self, other) {
            (CallbackItem::Str(a), CallbackItem::Str(b)) => {
                Arc::ptr_eq(a, b) || matches!((a.get(), b.get()), (Some(a), Some(b)) if a == b)
            }
            (CallbackItem::Tuple(a), CallbackItem::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_value(b))
            }
            (CallbackItem::Optional(Some(a)), CallbackItem::Optional(Some(b))) => a.same_value(b),
            _ => self == other,
        }
    }
}

impl PartialEq for CallbackItem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CallbackItem::Unit, CallbackItem::Unit) => true,
            (CallbackItem::Bool(a), CallbackItem::Bool(b)) => a == b,
            (CallbackItem::I32(a), CallbackItem::I32(b)) => a == b,
            (CallbackItem::F32(a), CallbackItem::F32(b)) => a == b,
            (CallbackItem::F64(a), CallbackItem::F64(b)) => a == b,
            (CallbackItem::Str(a), CallbackItem::Str(b)) => Arc::ptr_eq(a, b),
            (CallbackItem::Entity(a), CallbackItem::Entity(b)) => Arc::ptr_eq(a, b),
            (CallbackItem::List(a), CallbackItem::List(b)) => Arc::ptr_eq(a, b),
            (CallbackItem::Map(a), CallbackItem::Map(b)) => Arc::ptr_eq(a, b),
            (CallbackItem::Tuple(a), CallbackItem::Tuple(b)) => a == b,
            (CallbackItem::Optional(a), CallbackItem::Optional(b)) => a == b,
            (CallbackItem::Func(a), CallbackItem::Func(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for CallbackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackItem::Unit => f.write_str("Unit"),
            CallbackItem::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            CallbackItem::I32(v) => f.debug_tuple("I32").field(v).finish(),
            CallbackItem::F32(v) => f.debug_tuple("F32").field(v).finish(),
            CallbackItem::F64(v) => f.debug_tuple("F64").field(v).finish(),
            CallbackItem::Str(view) => f.debug_tuple("Str").field(&view.get()).finish(),
            CallbackItem::Entity(view) => f.debug_tuple("Entity").field(&view.name()).finish(),
            CallbackItem::List(view) => write!(f, "List<{}>", view.element_type()),
            CallbackItem::Map(view) => {
                write!(f, "Map<{}, {}>", view.key_type(), view.value_type())
            }
            CallbackItem::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            CallbackItem::Optional(item) => f.debug_tuple("Optional").field(item).finish(),
            CallbackItem::Func(view) => write!(f, "Func{}", view.signature()),
        }
    }
}
