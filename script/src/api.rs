//! The host API visible to scripts.
//!
//! Read-only access to views needs nothing but the view and is registered
//! on every engine. Anything that lends a script value back out (setting
//! list elements, invoking callbacks, registering listeners, emitting
//! events) needs the owning avatar and is bound per avatar.
//!
//! rhai reserves `call` for its own function pointers, so host callbacks
//! are run with `callback.invoke(...)`.

use std::sync::{Arc, Weak};

use marionette_exchange::{
    CallbackItem, Converter, EntityView, EventId, FuncView, ListView, MapView, Registration,
    StringView, ViewError, convert,
};
use marionette_types::{Avatar, AvatarError, AvatarFailure};
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, INT, Position};

use crate::avatar::ScriptedAvatar;
use crate::convert::to_dynamic;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

#[derive(Clone)]
pub(crate) struct ScriptString(pub(crate) Arc<StringView>);

#[derive(Clone)]
pub(crate) struct ScriptEntity(pub(crate) Arc<EntityView>);

#[derive(Clone)]
pub(crate) struct ScriptList(pub(crate) Arc<ListView>);

#[derive(Clone)]
pub(crate) struct ScriptMap(pub(crate) Arc<MapView>);

#[derive(Clone)]
pub(crate) struct ScriptCallable(pub(crate) Arc<FuncView>);

/// Returned by `on(...)`; pass to `off(...)` to stop listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScriptRegistration {
    pub(crate) event: EventId,
    pub(crate) registration: Registration,
}

fn runtime_error(message: impl Into<String>) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(message.into()), Position::NONE).into()
}

/// Mark the running avatar errored and unwind the script.
pub(crate) fn raise(avatar: &ScriptedAvatar, error: AvatarError) -> Box<EvalAltResult> {
    let message = error.to_string();
    avatar.error(AvatarFailure::Domain(error));
    runtime_error(message)
}

fn view_error(avatar: &ScriptedAvatar, err: ViewError) -> Box<EvalAltResult> {
    let error = match err {
        ViewError::Mismatch(fault) => AvatarError::Conversion(fault),
        ViewError::Revoked => AvatarError::RevokedAccess,
        ViewError::OutOfRange { .. } => AvatarError::script(err.to_string()),
    };
    raise(avatar, error)
}

fn index(index: INT) -> ScriptResult<usize> {
    usize::try_from(index).map_err(|_| runtime_error(format!("negative index {index}")))
}

fn upgrade(avatar: &Weak<ScriptedAvatar>) -> ScriptResult<Arc<ScriptedAvatar>> {
    avatar
        .upgrade()
        .ok_or_else(|| runtime_error(AvatarError::Unloaded.to_string()))
}

fn optional<T: Into<Dynamic>>(value: Option<T>) -> Dynamic {
    value.map_or(Dynamic::UNIT, Into::into)
}

/// An engine with every view type and read-only accessor registered.
pub(crate) fn base_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_fast_operators(true);
    engine.set_max_call_levels(64);

    engine
        .register_type_with_name::<ScriptString>("StringView")
        .register_type_with_name::<ScriptEntity>("Entity")
        .register_type_with_name::<ScriptList>("ListView")
        .register_type_with_name::<ScriptMap>("MapView")
        .register_type_with_name::<ScriptCallable>("Callback")
        .register_type_with_name::<ScriptRegistration>("Registration");

    engine.register_fn("len", |s: &mut ScriptString| {
        optional(s.0.length().map(|n| n as INT))
    });
    engine.register_fn("copy", |s: &mut ScriptString| optional(s.0.copy()));
    engine.register_fn("to_string", |s: &mut ScriptString| {
        s.0.copy().unwrap_or_else(|| "<revoked>".to_string())
    });

    engine.register_fn("uuid", |entity: &mut ScriptEntity| {
        optional(entity.0.uuid().map(|uuid| uuid.to_string()))
    });
    engine.register_fn("name", |entity: &mut ScriptEntity| optional(entity.0.name()));
    engine.register_fn("to_string", |entity: &mut ScriptEntity| {
        entity.0.name().unwrap_or_else(|| "<revoked>".to_string())
    });

    engine.register_fn("len", |list: &mut ScriptList| {
        optional(list.0.length().map(|n| n as INT))
    });
    engine.register_fn("len", |map: &mut ScriptMap| optional(map.0.size().map(|n| n as INT)));
    engine.register_fn("freeze", |list: &mut ScriptList| list.0.freeze());
    engine.register_fn("freeze", |map: &mut ScriptMap| map.0.freeze());

    engine.register_fn("is_revoked", |s: &mut ScriptString| s.0.length().is_none());
    engine.register_fn("is_revoked", |entity: &mut ScriptEntity| entity.0.uuid().is_none());
    engine.register_fn("is_revoked", |list: &mut ScriptList| list.0.length().is_none());
    engine.register_fn("is_revoked", |map: &mut ScriptMap| map.0.size().is_none());
    engine.register_fn("is_revoked", |callable: &mut ScriptCallable| {
        callable.0.callback().is_none()
    });
    engine.register_fn("signature", |callable: &mut ScriptCallable| {
        callable.0.signature().to_string()
    });

    engine
}

macro_rules! register_invoke {
    ($engine:expr, $avatar:expr $(, $arg:ident)*) => {{
        let avatar = Weak::clone($avatar);
        $engine.register_fn(
            "invoke",
            move |callable: &mut ScriptCallable $(, $arg: Dynamic)*| {
                invoke(&avatar, callable, vec![$($arg),*])
            },
        );
    }};
}

macro_rules! register_emit {
    ($engine:expr, $avatar:expr $(, $arg:ident)*) => {{
        let avatar = Weak::clone($avatar);
        $engine.register_fn(
            "emit",
            move |event: &str $(, $arg: Dynamic)*| -> ScriptResult<INT> {
                let avatar = upgrade(&avatar)?;
                avatar.emit(event, vec![$($arg),*]).map(|queued| queued as INT)
            },
        );
    }};
}

/// Register everything that acts on behalf of `avatar`.
pub(crate) fn bind(engine: &mut Engine, avatar: &Weak<ScriptedAvatar>) {
    let owner = Weak::clone(avatar);
    engine.register_fn("get", move |list: &mut ScriptList, at: INT| -> ScriptResult<Dynamic> {
        let avatar = upgrade(&owner)?;
        match list.0.get(index(at)?) {
            Ok(item) => Ok(optional(item.map(to_dynamic))),
            Err(err) => Err(view_error(&avatar, err)),
        }
    });

    let owner = Weak::clone(avatar);
    engine.register_fn(
        "set",
        move |list: &mut ScriptList, at: INT, value: Dynamic| -> ScriptResult<bool> {
            let avatar = upgrade(&owner)?;
            let item = avatar
                .converter()
                .to_item(list.0.element_type(), value)
                .map_err(|fault| raise(&avatar, fault.into()))?;
            list.0.set(index(at)?, item).map_err(|err| view_error(&avatar, err))
        },
    );

    let owner = Weak::clone(avatar);
    engine.register_fn("get", move |map: &mut ScriptMap, key: Dynamic| -> ScriptResult<Dynamic> {
        let avatar = upgrade(&owner)?;
        let key = map_key(&avatar, &map.0, key)?;
        match map.0.get(&key) {
            Ok(item) => Ok(optional(item.map(to_dynamic))),
            Err(err) => Err(view_error(&avatar, err)),
        }
    });

    let owner = Weak::clone(avatar);
    engine.register_fn(
        "put",
        move |map: &mut ScriptMap, key: Dynamic, value: Dynamic| -> ScriptResult<bool> {
            let avatar = upgrade(&owner)?;
            let key = map_key(&avatar, &map.0, key)?;
            let value = avatar
                .converter()
                .to_item(map.0.value_type(), value)
                .map_err(|fault| raise(&avatar, fault.into()))?;
            map.0.put(key, value).map_err(|err| view_error(&avatar, err))
        },
    );

    let owner = Weak::clone(avatar);
    engine.register_fn("remove", move |map: &mut ScriptMap, key: Dynamic| -> ScriptResult<bool> {
        let avatar = upgrade(&owner)?;
        let key = map_key(&avatar, &map.0, key)?;
        map.0.remove(&key).map_err(|err| view_error(&avatar, err))
    });

    register_invoke!(engine, avatar);
    register_invoke!(engine, avatar, a);
    register_invoke!(engine, avatar, a, b);
    register_invoke!(engine, avatar, a, b, c);
    register_invoke!(engine, avatar, a, b, c, d);
    register_invoke!(engine, avatar, a, b, c, d, e);
    register_invoke!(engine, avatar, a, b, c, d, e, f);
    register_invoke!(engine, avatar, a, b, c, d, e, f, g);
    register_invoke!(engine, avatar, a, b, c, d, e, f, g, h);

    register_emit!(engine, avatar);
    register_emit!(engine, avatar, a);
    register_emit!(engine, avatar, a, b);
    register_emit!(engine, avatar, a, b, c);
    register_emit!(engine, avatar, a, b, c, d);
    register_emit!(engine, avatar, a, b, c, d, e);
    register_emit!(engine, avatar, a, b, c, d, e, f);
    register_emit!(engine, avatar, a, b, c, d, e, f, g);
    register_emit!(engine, avatar, a, b, c, d, e, f, g, h);

    let owner = Weak::clone(avatar);
    engine.register_fn(
        "on",
        move |event: &str, function: FnPtr| -> ScriptResult<ScriptRegistration> {
            let avatar = upgrade(&owner)?;
            avatar.listen(event, function)
        },
    );

    let owner = Weak::clone(avatar);
    engine.register_fn("off", move |registration: ScriptRegistration| {
        if let Some(avatar) = owner.upgrade() {
            avatar.unlisten(registration);
        }
    });
}

fn map_key(avatar: &ScriptedAvatar, map: &MapView, key: Dynamic) -> ScriptResult<CallbackItem> {
    avatar
        .converter()
        .to_item(map.key_type(), key)
        .map_err(|fault| raise(avatar, fault.into()))
}

/// `callable.invoke(...)` from script: arguments are ours to get right.
///
/// Another avatar's callback is never entered from here; the call does
/// nothing and yields `()`.
fn invoke(avatar: &Weak<ScriptedAvatar>, callable: &ScriptCallable, args: Vec<Dynamic>) -> ScriptResult<Dynamic> {
    let avatar = upgrade(avatar)?;
    let handle = avatar.handle();
    if let Some(owner) = callable.0.owner()
        && !handle.as_ref().is_some_and(|own| own.same_avatar(&owner))
    {
        tracing::debug!(avatar = %avatar.name(), "Ignoring invoke of another avatar's callback");
        return Ok(Dynamic::UNIT);
    }
    let param = callable.0.signature().param();
    let items = convert::args_to_item(&avatar.converter(), param, args)
        .map(|item| convert::spread(param, item))
        .map_err(|fault| raise(&avatar, fault.into()))?;
    match callable.0.invoke(handle.as_ref(), avatar.budgets().callback, items) {
        Ok(result) => Ok(optional(result.map(to_dynamic))),
        Err(err) => Err(view_error(&avatar, err)),
    }
}
