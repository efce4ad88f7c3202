//! Script functions handed across the boundary.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use marionette_exchange::{CallbackItem, FuncType, ScriptCallback};
use marionette_runtime::AvatarHandle;
use marionette_types::Avatar;
use rhai::FnPtr;

use crate::avatar::ScriptedAvatar;

/// A rhai function pointer or closure, typed by the signature it was
/// converted to.
pub(crate) struct RhaiCallback {
    signature: FuncType,
    function: FnPtr,
    owner: Weak<ScriptedAvatar>,
}

impl RhaiCallback {
    pub(crate) fn new(signature: FuncType, function: FnPtr, owner: Weak<ScriptedAvatar>) -> Self {
        Self {
            signature,
            function,
            owner,
        }
    }
}

impl ScriptCallback for RhaiCallback {
    fn signature(&self) -> &FuncType {
        &self.signature
    }

    fn owner(&self) -> Option<AvatarHandle<dyn Avatar>> {
        self.owner.upgrade().and_then(|avatar| avatar.handle())
    }

    fn call(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        budget: Duration,
        arg: CallbackItem,
    ) -> Option<CallbackItem> {
        let avatar = self.owner.upgrade()?;
        let handle = avatar.handle()?;
        match caller {
            // Re-entering from our own code: the lock, if any, is already held.
            Some(caller) if caller.same_avatar(&handle) => {
                avatar.call_function(&self.function, &self.signature, budget, arg)
            }
            // Other avatars reach us through queued events only.
            Some(_) => {
                tracing::debug!(avatar = %avatar.name(), "Refusing call from another avatar");
                None
            }
            None => handle.with(|_| avatar.call_function(&self.function, &self.signature, budget, arg)),
        }
    }
}

impl fmt::Debug for RhaiCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiCallback")
            .field("signature", &self.signature.to_string())
            .field("function", &self.function.fn_name())
            .finish_non_exhaustive()
    }
}
