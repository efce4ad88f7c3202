//! rhai values on either side of the boundary.
//!
//! Primitives convert by value. rhai arrays and object maps are lent as
//! list and map views that convert their elements lazily, so a script
//! error in a nested element surfaces on access and is blamed on the
//! lending script. Views arriving from elsewhere are wrapped, never copied.

use std::sync::{Arc, Weak};

use marionette_exchange::{
    BackingFault, CallbackItem, CallbackType, Converter, Lender, ListBacking, MapBacking,
};
use marionette_types::ConversionFault;
use rhai::{Array, Dynamic, FLOAT, FnPtr, INT, Map};

use crate::api::{ScriptCallable, ScriptEntity, ScriptList, ScriptMap, ScriptString};
use crate::avatar::ScriptedAvatar;
use crate::callback::RhaiCallback;

/// Converter for one avatar's outgoing values.
#[derive(Clone)]
pub(crate) struct RhaiConverter {
    lender: Lender,
    avatar: Weak<ScriptedAvatar>,
}

impl RhaiConverter {
    pub(crate) fn new(lender: Lender, avatar: Weak<ScriptedAvatar>) -> Self {
        Self { lender, avatar }
    }

    fn beneath(&self, lender: &Lender) -> Self {
        Self {
            lender: lender.clone(),
            avatar: self.avatar.clone(),
        }
    }

    fn lend_array(&self, element: &CallbackType, value: Dynamic) -> Result<CallbackItem, ConversionFault> {
        let actual = value.type_name();
        let values = value
            .into_array()
            .map_err(|_| ConversionFault::mismatch(format!("[{element}]"), actual))?;
        let backing = ArrayBacking {
            values,
            converter: self.clone(),
        };
        self.lender.lend_list(element.clone(), Box::new(backing))
    }

    fn lend_object(
        &self,
        key: &CallbackType,
        value_type: &CallbackType,
        value: Dynamic,
    ) -> Result<CallbackItem, ConversionFault> {
        // Object map keys are always strings.
        if *key != CallbackType::Str {
            return Err(ConversionFault::mismatch(
                format!("{{ {key} -> {value_type} }}"),
                "map with string keys",
            ));
        }
        let actual = value.type_name();
        let entries = value.try_cast::<Map>().ok_or_else(|| {
            ConversionFault::mismatch(format!("{{ {key} -> {value_type} }}"), actual)
        })?;
        let backing = ObjectBacking {
            entries,
            converter: self.clone(),
        };
        self.lender
            .lend_map(key.clone(), value_type.clone(), Box::new(backing))
    }

    fn tuple(&self, ty: &CallbackType, elements: &[CallbackType], value: Dynamic) -> Result<CallbackItem, ConversionFault> {
        let actual = value.type_name();
        let values = value
            .into_array()
            .map_err(|_| ConversionFault::mismatch(ty.to_string(), actual))?;
        if values.len() != elements.len() {
            return Err(ConversionFault::mismatch(
                ty.to_string(),
                format!("array of {}", values.len()),
            ));
        }
        let items = elements
            .iter()
            .zip(values)
            .map(|(ty, value)| self.to_item(ty, value))
            .collect::<Result<_, _>>()?;
        Ok(CallbackItem::Tuple(items))
    }
}

fn float(value: &Dynamic) -> Option<FLOAT> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|n| n as FLOAT))
}

impl Converter for RhaiConverter {
    type Native = Dynamic;

    fn to_item(&self, ty: &CallbackType, value: Dynamic) -> Result<CallbackItem, ConversionFault> {
        let actual = value.type_name();
        let mismatch = || ConversionFault::mismatch(ty.to_string(), actual);
        match ty {
            CallbackType::Unit if value.is_unit() => Ok(CallbackItem::Unit),
            CallbackType::Bool => value.as_bool().map(CallbackItem::Bool).map_err(|_| mismatch()),
            CallbackType::I32 => value
                .as_int()
                .ok()
                .and_then(|n| i32::try_from(n).ok())
                .map(CallbackItem::I32)
                .ok_or_else(mismatch),
            CallbackType::F32 => float(&value)
                .map(|n| CallbackItem::F32(n as f32))
                .ok_or_else(mismatch),
            CallbackType::F64 => float(&value).map(CallbackItem::F64).ok_or_else(mismatch),
            CallbackType::Str if value.is_string() => {
                let s = value.into_immutable_string().map_err(|_| mismatch())?;
                self.lender.lend_str(s.as_str())
            }
            CallbackType::Str => value
                .try_cast::<ScriptString>()
                .map(|s| CallbackItem::Str(s.0))
                .ok_or_else(mismatch),
            CallbackType::Entity => value
                .try_cast::<ScriptEntity>()
                .map(|entity| CallbackItem::Entity(entity.0))
                .ok_or_else(mismatch),
            CallbackType::List(element) if value.is_array() => self.lend_array(element, value),
            CallbackType::List(element) => value
                .try_cast::<ScriptList>()
                .filter(|list| list.0.element_type() == element.as_ref())
                .map(|list| CallbackItem::List(list.0))
                .ok_or_else(mismatch),
            CallbackType::Map(key, value_type) if value.is_map() => {
                self.lend_object(key, value_type, value)
            }
            CallbackType::Map(key, value_type) => value
                .try_cast::<ScriptMap>()
                .filter(|map| map.0.key_type() == key.as_ref() && map.0.value_type() == value_type.as_ref())
                .map(|map| CallbackItem::Map(map.0))
                .ok_or_else(mismatch),
            CallbackType::Tuple(tuple) => self.tuple(ty, tuple.elements(), value),
            CallbackType::Optional(_) if value.is_unit() => Ok(CallbackItem::none()),
            CallbackType::Optional(inner) => Ok(CallbackItem::some(self.to_item(inner, value)?)),
            CallbackType::Func(signature) if value.is::<FnPtr>() => {
                let function = value.try_cast::<FnPtr>().ok_or_else(mismatch)?;
                let callback =
                    RhaiCallback::new(signature.as_ref().clone(), function, self.avatar.clone());
                self.lender.lend_func(Arc::new(callback))
            }
            CallbackType::Func(signature) => value
                .try_cast::<ScriptCallable>()
                .filter(|callable| callable.0.signature() == signature.as_ref())
                .map(|callable| CallbackItem::Func(callable.0))
                .ok_or_else(mismatch),
            CallbackType::Any => Err(ConversionFault::Unsupported),
            CallbackType::Unit => Err(mismatch()),
        }
    }

    fn from_item(&self, item: CallbackItem) -> Result<Dynamic, ConversionFault> {
        Ok(to_dynamic(item))
    }
}

/// Every item has a rhai representation, so this direction cannot fail.
pub(crate) fn to_dynamic(item: CallbackItem) -> Dynamic {
    match item {
        CallbackItem::Unit | CallbackItem::Optional(None) => Dynamic::UNIT,
        CallbackItem::Bool(b) => Dynamic::from_bool(b),
        CallbackItem::I32(n) => Dynamic::from_int(INT::from(n)),
        CallbackItem::F32(n) => Dynamic::from_float(FLOAT::from(n)),
        CallbackItem::F64(n) => Dynamic::from_float(n),
        CallbackItem::Str(view) => Dynamic::from(ScriptString(view)),
        CallbackItem::Entity(view) => Dynamic::from(ScriptEntity(view)),
        CallbackItem::List(view) => Dynamic::from(ScriptList(view)),
        CallbackItem::Map(view) => Dynamic::from(ScriptMap(view)),
        CallbackItem::Func(view) => Dynamic::from(ScriptCallable(view)),
        CallbackItem::Tuple(items) => Dynamic::from_array(items.into_iter().map(to_dynamic).collect()),
        CallbackItem::Optional(Some(inner)) => to_dynamic(*inner),
    }
}

/// The positional values a script function produced.
///
/// A function that falls off its end returns `()`, which counts as no
/// values at all so every slot is padded.
pub(crate) fn return_values(ret: &CallbackType, value: Dynamic) -> Vec<Dynamic> {
    if value.is_unit() {
        return Vec::new();
    }
    match ret {
        CallbackType::Tuple(_) if value.is_array() => value.into_array().unwrap_or_default(),
        _ => vec![value],
    }
}

/// A rhai array lent as a list view.
struct ArrayBacking {
    values: Array,
    converter: RhaiConverter,
}

impl ListBacking for ArrayBacking {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn get(
        &self,
        index: usize,
        element: &CallbackType,
        contents: &Lender,
    ) -> Result<CallbackItem, ConversionFault> {
        let value = self.values.get(index).cloned().unwrap_or(Dynamic::UNIT);
        self.converter.beneath(contents).to_item(element, value)
    }

    fn set(&mut self, index: usize, item: CallbackItem) -> Result<(), ConversionFault> {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = to_dynamic(item);
        }
        Ok(())
    }
}

/// A rhai object map lent as a `{ string -> V }` view.
struct ObjectBacking {
    entries: Map,
    converter: RhaiConverter,
}

fn key_text(key: &CallbackItem) -> Option<String> {
    match key {
        CallbackItem::Str(view) => view.copy(),
        _ => None,
    }
}

impl MapBacking for ObjectBacking {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn get(
        &self,
        key: &CallbackItem,
        value: &CallbackType,
        contents: &Lender,
    ) -> Result<Option<CallbackItem>, BackingFault> {
        // A revoked key finds nothing.
        let Some(key) = key_text(key) else {
            return Ok(None);
        };
        let Some(entry) = self.entries.get(key.as_str()) else {
            return Ok(None);
        };
        self.converter
            .beneath(contents)
            .to_item(value, entry.clone())
            .map(Some)
            .map_err(BackingFault::Lender)
    }

    fn put(&mut self, key: CallbackItem, value: CallbackItem) -> Result<(), ConversionFault> {
        let Some(key) = key_text(&key) else {
            return Err(ConversionFault::mismatch("string", "revoked string"));
        };
        self.entries.insert(key.into(), to_dynamic(value));
        Ok(())
    }

    fn remove(&mut self, key: &CallbackItem) -> Result<bool, ConversionFault> {
        Ok(key_text(key).is_some_and(|key| self.entries.remove(key.as_str()).is_some()))
    }
}
