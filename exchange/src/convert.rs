//! Per-engine conversion and the positional calling convention.
//!
//! A function whose parameter type is a tuple of N elements is called with N
//! positional values, not one aggregate. Unit takes none; any other type
//! takes exactly one. Returns follow the same shape, and missing trailing
//! return slots are padded with the slot type's neutral value. Extra return
//! values are ignored.
//!
//! Argument faults belong to the invoker. Return faults belong to the callee.
//! These helpers only report the fault; callers route it.

use marionette_types::ConversionFault;

use crate::item::CallbackItem;
use crate::ty::CallbackType;

/// Moves values between one script engine's native representation and
/// [`CallbackItem`].
pub trait Converter {
    type Native;

    /// Convert a native value to an item of type `ty`.
    fn to_item(&self, ty: &CallbackType, value: Self::Native)
    -> Result<CallbackItem, ConversionFault>;

    fn from_item(&self, item: CallbackItem) -> Result<Self::Native, ConversionFault>;
}

fn assemble(shape: &CallbackType, items: Vec<CallbackItem>) -> CallbackItem {
    match shape {
        CallbackType::Unit => CallbackItem::Unit,
        CallbackType::Tuple(_) => CallbackItem::Tuple(items),
        _ => items.into_iter().next().unwrap_or(CallbackItem::Unit),
    }
}

/// Split an item of type `shape` into its positional values.
#[must_use]
pub fn spread(shape: &CallbackType, item: CallbackItem) -> Vec<CallbackItem> {
    match (shape, item) {
        (CallbackType::Unit, _) => Vec::new(),
        (CallbackType::Tuple(_), CallbackItem::Tuple(items)) => items,
        (_, item) => vec![item],
    }
}

/// Check positional items against `param` and assemble the call argument.
pub fn pack_items(
    param: &CallbackType,
    items: Vec<CallbackItem>,
) -> Result<CallbackItem, ConversionFault> {
    let slots = param.positional();
    if items.len() != slots.len() {
        return Err(ConversionFault::Arity {
            expected: slots.len(),
            actual: items.len(),
        });
    }
    if let Some((ty, item)) = slots.iter().zip(&items).find(|(ty, item)| !item.matches(ty)) {
        return Err(ConversionFault::mismatch(ty.to_string(), item.kind().to_string()));
    }
    Ok(assemble(param, items))
}

/// Convert positional native arguments into the call argument for `param`.
pub fn args_to_item<C: Converter + ?Sized>(
    converter: &C,
    param: &CallbackType,
    args: Vec<C::Native>,
) -> Result<CallbackItem, ConversionFault> {
    let slots = param.positional();
    if args.len() != slots.len() {
        return Err(ConversionFault::Arity {
            expected: slots.len(),
            actual: args.len(),
        });
    }
    let items = slots
        .iter()
        .zip(args)
        .map(|(ty, arg)| converter.to_item(ty, arg))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(assemble(param, items))
}

/// Callee side: the positional native values of a call argument.
pub fn item_to_natives<C: Converter + ?Sized>(
    converter: &C,
    shape: &CallbackType,
    item: CallbackItem,
) -> Result<Vec<C::Native>, ConversionFault> {
    spread(shape, item)
        .into_iter()
        .map(|item| converter.from_item(item))
        .collect()
}

/// Pad missing trailing return slots of `ret` with neutral values.
pub fn pad_returns(
    ret: &CallbackType,
    mut items: Vec<CallbackItem>,
) -> Result<CallbackItem, ConversionFault> {
    let slots = ret.positional();
    items.truncate(slots.len());
    for ty in &slots[items.len()..] {
        let neutral = ty
            .neutral()
            .ok_or_else(|| ConversionFault::MissingReturn(ty.to_string()))?;
        items.push(neutral);
    }
    if let Some((ty, item)) = slots.iter().zip(&items).find(|(ty, item)| !item.matches(ty)) {
        return Err(ConversionFault::mismatch(ty.to_string(), item.kind().to_string()));
    }
    Ok(assemble(ret, items))
}

/// Convert the native values a callee produced into the return item for `ret`.
pub fn returns_to_item<C: Converter + ?Sized>(
    converter: &C,
    ret: &CallbackType,
    values: Vec<C::Native>,
) -> Result<CallbackItem, ConversionFault> {
    let items = ret
        .positional()
        .iter()
        .zip(values)
        .map(|(ty, value)| converter.to_item(ty, value))
        .collect::<Result<Vec<_>, _>>()?;
    pad_returns(ret, items)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A dynamically typed toy engine: one number type, arrays for tuples.
    #[derive(Debug, Clone, PartialEq)]
    enum Toy {
        Nil,
        Bool(bool),
        Num(f64),
        Array(Vec<Toy>),
    }

    struct ToyConverter;

    impl Converter for ToyConverter {
        type Native = Toy;

        fn to_item(&self, ty: &CallbackType, value: Toy) -> Result<CallbackItem, ConversionFault> {
            let mismatch = |value: &Toy| ConversionFault::mismatch(ty.to_string(), format!("{value:?}"));
            match (ty, value) {
                (CallbackType::Unit, Toy::Nil) => Ok(CallbackItem::Unit),
                (CallbackType::Bool, Toy::Bool(b)) => Ok(CallbackItem::Bool(b)),
                #[allow(clippy::cast_possible_truncation)]
                (CallbackType::I32, Toy::Num(n)) if n.fract() == 0.0 => Ok(CallbackItem::I32(n as i32)),
                #[allow(clippy::cast_possible_truncation)]
                (CallbackType::F32, Toy::Num(n)) => Ok(CallbackItem::F32(n as f32)),
                (CallbackType::F64, Toy::Num(n)) => Ok(CallbackItem::F64(n)),
                (CallbackType::Optional(_), Toy::Nil) => Ok(CallbackItem::none()),
                (CallbackType::Optional(inner), value) => {
                    Ok(CallbackItem::some(self.to_item(inner, value)?))
                }
                (CallbackType::Tuple(tuple), Toy::Array(values)) if values.len() == tuple.arity() => {
                    let items = tuple
                        .elements()
                        .iter()
                        .zip(values)
                        .map(|(ty, value)| self.to_item(ty, value))
                        .collect::<Result<_, _>>()?;
                    Ok(CallbackItem::Tuple(items))
                }
                (CallbackType::Any, _) => Err(ConversionFault::Unsupported),
                (_, value) => Err(mismatch(&value)),
            }
        }

        fn from_item(&self, item: CallbackItem) -> Result<Toy, ConversionFault> {
            Ok(match item {
                CallbackItem::Unit | CallbackItem::Optional(None) => Toy::Nil,
                CallbackItem::Bool(b) => Toy::Bool(b),
                CallbackItem::I32(n) => Toy::Num(f64::from(n)),
                CallbackItem::F32(n) => Toy::Num(f64::from(n)),
                CallbackItem::F64(n) => Toy::Num(n),
                CallbackItem::Optional(Some(inner)) => self.from_item(*inner)?,
                CallbackItem::Tuple(items) => Toy::Array(
                    items
                        .into_iter()
                        .map(|item| self.from_item(item))
                        .collect::<Result<_, _>>()?,
                ),
                other => return Err(ConversionFault::mismatch("toy value", other.kind().to_string())),
            })
        }
    }

    fn ty(source: &str) -> CallbackType {
        source.parse().unwrap()
    }

    #[test]
    fn primitives_and_tuples_round_trip() {
        let cases = [
            ("()", Toy::Nil),
            ("bool", Toy::Bool(true)),
            ("i32", Toy::Num(-42.0)),
            ("f32", Toy::Num(0.5)),
            ("f64", Toy::Num(1e300)),
            ("i32?", Toy::Nil),
            ("i32?", Toy::Num(7.0)),
            ("(i32, bool)", Toy::Array(vec![Toy::Num(1.0), Toy::Bool(false)])),
            (
                "(f64, (bool, i32?), f32)",
                Toy::Array(vec![
                    Toy::Num(2.25),
                    Toy::Array(vec![Toy::Bool(true), Toy::Nil]),
                    Toy::Num(-0.125),
                ]),
            ),
        ];
        for (source, value) in cases {
            let ty = ty(source);
            let item = ToyConverter.to_item(&ty, value.clone()).unwrap();
            assert!(item.matches(&ty), "{source}");
            assert_eq!(ToyConverter.from_item(item).unwrap(), value, "{source}");
        }
    }

    #[test]
    fn any_never_converts() {
        assert_eq!(
            ToyConverter.to_item(&CallbackType::Any, Toy::Nil),
            Err(ConversionFault::Unsupported)
        );
    }

    #[test]
    fn tuple_parameters_take_positional_arguments() {
        let param = ty("(i32, bool)");
        let item = args_to_item(&ToyConverter, &param, vec![Toy::Num(3.0), Toy::Bool(true)]).unwrap();
        assert_eq!(
            item,
            CallbackItem::Tuple(vec![CallbackItem::I32(3), CallbackItem::Bool(true)])
        );
        assert_eq!(
            item_to_natives(&ToyConverter, &param, item).unwrap(),
            vec![Toy::Num(3.0), Toy::Bool(true)]
        );

        let unit = args_to_item(&ToyConverter, &CallbackType::Unit, Vec::new()).unwrap();
        assert_eq!(unit, CallbackItem::Unit);
        assert!(item_to_natives(&ToyConverter, &CallbackType::Unit, unit).unwrap().is_empty());
    }

    #[test]
    fn wrong_arity_is_distinct_from_wrong_type() {
        let param = ty("(i32, i32, i32)");
        assert_eq!(
            args_to_item(&ToyConverter, &param, vec![Toy::Num(1.0), Toy::Num(2.0)]),
            Err(ConversionFault::Arity {
                expected: 3,
                actual: 2
            })
        );
        assert!(matches!(
            args_to_item(&ToyConverter, &param, vec![Toy::Num(1.0), Toy::Num(2.0), Toy::Bool(true)]),
            Err(ConversionFault::TypeMismatch { .. })
        ));
        assert_eq!(
            pack_items(&CallbackType::F32, Vec::new()),
            Err(ConversionFault::Arity {
                expected: 1,
                actual: 0
            })
        );
        assert_eq!(
            pack_items(&CallbackType::F32, vec![CallbackItem::I32(1)]),
            Err(ConversionFault::mismatch("f32", "i32"))
        );
    }

    #[test]
    fn missing_returns_are_padded_with_neutral_values() {
        let ret = ty("(bool, i32, f64?)");
        let item = returns_to_item(&ToyConverter, &ret, vec![Toy::Bool(true)]).unwrap();
        assert_eq!(
            item,
            CallbackItem::Tuple(vec![
                CallbackItem::Bool(true),
                CallbackItem::I32(0),
                CallbackItem::none()
            ])
        );
        assert_eq!(
            returns_to_item(&ToyConverter, &CallbackType::Bool, Vec::new()),
            Ok(CallbackItem::Bool(false))
        );
    }

    #[test]
    fn extra_returns_are_ignored() {
        assert_eq!(
            returns_to_item(&ToyConverter, &CallbackType::Unit, vec![Toy::Num(5.0)]),
            Ok(CallbackItem::Unit)
        );
    }

    #[test]
    fn reference_slots_cannot_be_padded() {
        assert_eq!(
            pad_returns(&ty("(i32, string)"), vec![CallbackItem::I32(1)]),
            Err(ConversionFault::MissingReturn("string".to_string()))
        );
    }
}
