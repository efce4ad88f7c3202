//! Type descriptors for values crossing the sandbox boundary.

use std::fmt;
use std::slice;
use std::str::FromStr;

use thiserror::Error;

use crate::item::CallbackItem;
use crate::parse::{self, TypeParseError};

/// Bytes charged for any non-singleton type or value object.
pub const OBJECT_SIZE: usize = 16;
/// Bytes charged per reference held by an object.
pub const REFERENCE_SIZE: usize = 8;

/// Closed, recursive schema for exchanged values.
///
/// `Str`, `List`, `Map`, `Entity` and `Func` are reference types and always
/// travel as revocable views. `Any` is reserved: every conversion against
/// it fails.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallbackType {
    Unit,
    Bool,
    I32,
    F32,
    F64,
    Str,
    Entity,
    Any,
    List(Box<CallbackType>),
    Map(Box<CallbackType>, Box<CallbackType>),
    Tuple(TupleType),
    Optional(Box<CallbackType>),
    Func(Box<FuncType>),
}

/// Variant tags of [`CallbackType`] / [`CallbackItem`], without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Unit,
    Bool,
    I32,
    F32,
    F64,
    Str,
    Entity,
    Any,
    List,
    Map,
    Tuple,
    Optional,
    Func,
}

impl TypeKind {
    pub const ALL: [TypeKind; 13] = [
        TypeKind::Unit,
        TypeKind::Bool,
        TypeKind::I32,
        TypeKind::F32,
        TypeKind::F64,
        TypeKind::Str,
        TypeKind::Entity,
        TypeKind::Any,
        TypeKind::List,
        TypeKind::Map,
        TypeKind::Tuple,
        TypeKind::Optional,
        TypeKind::Func,
    ];
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeKind::Unit => "()",
            TypeKind::Bool => "bool",
            TypeKind::I32 => "i32",
            TypeKind::F32 => "f32",
            TypeKind::F64 => "f64",
            TypeKind::Str => "string",
            TypeKind::Entity => "entity",
            TypeKind::Any => "any",
            TypeKind::List => "list",
            TypeKind::Map => "map",
            TypeKind::Tuple => "tuple",
            TypeKind::Optional => "optional",
            TypeKind::Func => "function",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("tuple arity must be between {min} and {max}, got {0}", min = TupleType::MIN_ARITY, max = TupleType::MAX_ARITY)]
pub struct TupleArityError(pub usize);

/// Fixed positional arity, 2 through 8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleType(Vec<CallbackType>);

impl TupleType {
    pub const MIN_ARITY: usize = 2;
    pub const MAX_ARITY: usize = 8;

    pub fn new(elements: Vec<CallbackType>) -> Result<Self, TupleArityError> {
        if (Self::MIN_ARITY..=Self::MAX_ARITY).contains(&elements.len()) {
            Ok(Self(elements))
        } else {
            Err(TupleArityError(elements.len()))
        }
    }

    /// A tuple whose arity is checked at compile time.
    #[must_use]
    pub fn of<const N: usize>(elements: [CallbackType; N]) -> Self {
        const { assert!(N >= Self::MIN_ARITY && N <= Self::MAX_ARITY, "tuple arity out of range") };
        Self(elements.into())
    }

    #[must_use]
    pub fn elements(&self) -> &[CallbackType] {
        &self.0
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

/// A callable signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    param: CallbackType,
    ret: CallbackType,
}

impl FuncType {
    #[must_use]
    pub fn new(param: CallbackType, ret: CallbackType) -> Self {
        Self { param, ret }
    }

    #[must_use]
    pub fn param(&self) -> &CallbackType {
        &self.param
    }

    #[must_use]
    pub fn ret(&self) -> &CallbackType {
        &self.ret
    }

    /// Number of positional values a native call site passes.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.param.positional().len()
    }
}

impl CallbackType {
    #[must_use]
    pub fn list(element: CallbackType) -> Self {
        Self::List(Box::new(element))
    }

    #[must_use]
    pub fn map(key: CallbackType, value: CallbackType) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    #[must_use]
    pub fn optional(inner: CallbackType) -> Self {
        Self::Optional(Box::new(inner))
    }

    #[must_use]
    pub fn func(param: CallbackType, ret: CallbackType) -> Self {
        Self::Func(Box::new(FuncType::new(param, ret)))
    }

    pub fn tuple(elements: Vec<CallbackType>) -> Result<Self, TupleArityError> {
        TupleType::new(elements).map(Self::Tuple)
    }

    #[must_use]
    pub const fn kind(&self) -> TypeKind {
        match self {
            CallbackType::Unit => TypeKind::Unit,
            CallbackType::Bool => TypeKind::Bool,
            CallbackType::I32 => TypeKind::I32,
            CallbackType::F32 => TypeKind::F32,
            CallbackType::F64 => TypeKind::F64,
            CallbackType::Str => TypeKind::Str,
            CallbackType::Entity => TypeKind::Entity,
            CallbackType::Any => TypeKind::Any,
            CallbackType::List(_) => TypeKind::List,
            CallbackType::Map(..) => TypeKind::Map,
            CallbackType::Tuple(_) => TypeKind::Tuple,
            CallbackType::Optional(_) => TypeKind::Optional,
            CallbackType::Func(_) => TypeKind::Func,
        }
    }

    /// The positional slots this type occupies in a call: none for unit,
    /// one per element for a tuple, one otherwise.
    #[must_use]
    pub fn positional(&self) -> &[CallbackType] {
        match self {
            CallbackType::Unit => &[],
            CallbackType::Tuple(tuple) => tuple.elements(),
            other => slice::from_ref(other),
        }
    }

    /// Whether values of this type travel as revocable views.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(
            self,
            CallbackType::Str
                | CallbackType::Entity
                | CallbackType::List(_)
                | CallbackType::Map(..)
                | CallbackType::Func(_)
        )
    }

    /// Value used to pad a missing return slot, if this type has one.
    ///
    /// Reference types and `any` have none.
    #[must_use]
    pub fn neutral(&self) -> Option<CallbackItem> {
        match self {
            CallbackType::Unit => Some(CallbackItem::Unit),
            CallbackType::Bool => Some(CallbackItem::Bool(false)),
            CallbackType::I32 => Some(CallbackItem::I32(0)),
            CallbackType::F32 => Some(CallbackItem::F32(0.0)),
            CallbackType::F64 => Some(CallbackItem::F64(0.0)),
            CallbackType::Optional(_) => Some(CallbackItem::Optional(None)),
            CallbackType::Tuple(tuple) => tuple
                .elements()
                .iter()
                .map(CallbackType::neutral)
                .collect::<Option<Vec<_>>>()
                .map(CallbackItem::Tuple),
            CallbackType::Str
            | CallbackType::Entity
            | CallbackType::Any
            | CallbackType::List(_)
            | CallbackType::Map(..)
            | CallbackType::Func(_) => None,
        }
    }

    /// Bytes charged for holding a descriptor of this type. Singletons are free.
    #[must_use]
    pub fn footprint(&self) -> usize {
        match self {
            CallbackType::Unit
            | CallbackType::Bool
            | CallbackType::I32
            | CallbackType::F32
            | CallbackType::F64
            | CallbackType::Str
            | CallbackType::Entity
            | CallbackType::Any => 0,
            CallbackType::List(element) => OBJECT_SIZE + REFERENCE_SIZE + element.footprint(),
            CallbackType::Optional(inner) => OBJECT_SIZE + REFERENCE_SIZE + inner.footprint(),
            CallbackType::Map(key, value) => {
                OBJECT_SIZE + REFERENCE_SIZE * 2 + key.footprint() + value.footprint()
            }
            CallbackType::Func(func) => {
                OBJECT_SIZE + REFERENCE_SIZE * 2 + func.param.footprint() + func.ret.footprint()
            }
            CallbackType::Tuple(tuple) => {
                OBJECT_SIZE
                    + REFERENCE_SIZE * tuple.arity()
                    + tuple.elements().iter().map(CallbackType::footprint).sum::<usize>()
            }
        }
    }
}

impl fmt::Display for CallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackType::Unit => f.write_str("()"),
            CallbackType::Bool => f.write_str("bool"),
            CallbackType::I32 => f.write_str("i32"),
            CallbackType::F32 => f.write_str("f32"),
            CallbackType::F64 => f.write_str("f64"),
            CallbackType::Str => f.write_str("string"),
            CallbackType::Entity => f.write_str("entity"),
            CallbackType::Any => f.write_str("any"),
            CallbackType::List(element) => write!(f, "[{element}]"),
            CallbackType::Map(key, value) => write!(f, "{{ {key} -> {value} }}"),
            CallbackType::Tuple(tuple) => {
                f.write_str("(")?;
                for (i, element) in tuple.elements().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str(")")
            }
            CallbackType::Optional(inner) => write!(f, "{inner}?"),
            CallbackType::Func(func) => write!(f, "{func}"),
        }
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} -> {})", self.param, self.ret)
    }
}

impl FromStr for CallbackType {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(s: &str) -> CallbackType {
        s.parse().unwrap()
    }

    #[test]
    fn display_matches_signature_syntax() {
        let ty = CallbackType::func(
            CallbackType::tuple(vec![CallbackType::I32, CallbackType::optional(CallbackType::Str)])
                .unwrap(),
            CallbackType::map(CallbackType::Str, CallbackType::list(CallbackType::F64)),
        );
        assert_eq!(ty.to_string(), "((i32, string?) -> { string -> [f64] })");
        assert_eq!(CallbackType::Unit.to_string(), "()");
        assert_eq!(CallbackType::Entity.to_string(), "entity");
    }

    #[test]
    fn tuple_arity_is_bounded() {
        assert_eq!(
            TupleType::new(vec![CallbackType::I32]),
            Err(TupleArityError(1))
        );
        assert_eq!(
            TupleType::new(vec![CallbackType::I32; 9]),
            Err(TupleArityError(9))
        );
        assert_eq!(TupleType::new(vec![CallbackType::I32; 8]).unwrap().arity(), 8);
    }

    #[test]
    fn positional_slots() {
        assert!(CallbackType::Unit.positional().is_empty());
        assert_eq!(CallbackType::Bool.positional(), &[CallbackType::Bool]);
        assert_eq!(sig("(i32, f32, bool)").positional().len(), 3);
        // A list of tuples is a single slot.
        assert_eq!(sig("[(i32, i32)]").positional().len(), 1);
        assert_eq!(sig("(i32, f32) -> ()").positional().len(), 1);
    }

    #[test]
    fn func_arity_counts_tuple_elements() {
        let CallbackType::Func(func) = sig("(i32, i32, i32, () -> ()) -> bool") else {
            panic!("expected func");
        };
        assert_eq!(func.arity(), 4);
        assert_eq!(func.ret(), &CallbackType::Bool);
    }

    #[test]
    fn neutral_values_exist_only_for_value_types() {
        assert_eq!(CallbackType::I32.neutral(), Some(CallbackItem::I32(0)));
        assert_eq!(
            sig("string?").neutral(),
            Some(CallbackItem::Optional(None))
        );
        assert_eq!(
            sig("(bool, f64)").neutral(),
            Some(CallbackItem::Tuple(vec![
                CallbackItem::Bool(false),
                CallbackItem::F64(0.0)
            ]))
        );
        assert_eq!(CallbackType::Str.neutral(), None);
        assert_eq!(sig("(bool, [i32])").neutral(), None);
        assert_eq!(CallbackType::Any.neutral(), None);
    }

    #[test]
    fn footprint_counts_objects_and_references() {
        assert_eq!(CallbackType::F32.footprint(), 0);
        assert_eq!(sig("[i32]").footprint(), OBJECT_SIZE + REFERENCE_SIZE);
        assert_eq!(
            sig("{ string -> [i32] }").footprint(),
            OBJECT_SIZE + 2 * REFERENCE_SIZE + OBJECT_SIZE + REFERENCE_SIZE
        );
        assert_eq!(sig("(i32, f32)").footprint(), OBJECT_SIZE + 2 * REFERENCE_SIZE);
    }

    #[test]
    fn reference_types() {
        assert!(CallbackType::Str.is_reference());
        assert!(sig("() -> ()").is_reference());
        assert!(!sig("string?").is_reference());
        assert!(!CallbackType::Any.is_reference());
    }
}
