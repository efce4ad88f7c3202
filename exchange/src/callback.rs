//! Callable values crossing the boundary.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use marionette_runtime::AvatarHandle;
use marionette_types::{Avatar, AvatarError, ConversionFault};

use crate::collections::ViewError;
use crate::convert::pack_items;
use crate::item::CallbackItem;
use crate::ty::FuncType;
use crate::view::{Lifecycle, Revocable, View};

/// A function created by one side and callable by the other.
pub trait ScriptCallback: Send + Sync {
    fn signature(&self) -> &FuncType;

    /// The avatar whose code runs when this is called. `None` for host
    /// functions.
    fn owner(&self) -> Option<AvatarHandle<dyn Avatar>>;

    /// Run on the calling thread under `budget`.
    ///
    /// `arg` has already been checked against the parameter type. Returns
    /// `None` on failure; the failure has already been routed to the
    /// owner's error state and is never thrown back at the caller. Script
    /// callbacks also return `None` without running when `caller` is some
    /// other avatar.
    fn call(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        budget: Duration,
        arg: CallbackItem,
    ) -> Option<CallbackItem>;
}

/// Revocable reference to a callback.
///
/// Calling a revoked callback is an error rather than a silent no-op, so
/// "ran and returned nothing" stays distinguishable from "cannot run".
pub struct FuncView {
    signature: FuncType,
    slot: Arc<View<Arc<dyn ScriptCallback>>>,
}

impl FuncView {
    pub(crate) fn new(signature: FuncType, slot: Arc<View<Arc<dyn ScriptCallback>>>) -> Self {
        Self { signature, slot }
    }

    #[must_use]
    pub fn signature(&self) -> &FuncType {
        &self.signature
    }

    /// The callback itself, or `None` once revoked.
    #[must_use]
    pub fn callback(&self) -> Option<Arc<dyn ScriptCallback>> {
        self.slot.get()
    }

    #[must_use]
    pub fn owner(&self) -> Option<AvatarHandle<dyn Avatar>> {
        self.slot.read(|callback| callback.owner()).flatten()
    }

    /// Call with positional arguments.
    ///
    /// Ill-typed or miscounted arguments are the caller's fault and come
    /// back as [`ViewError::Mismatch`]. A return value that does not match
    /// the declared type is the callee's fault: its owner is marked errored
    /// and `Ok(None)` is returned.
    pub fn invoke(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        budget: Duration,
        args: Vec<CallbackItem>,
    ) -> Result<Option<CallbackItem>, ViewError> {
        let arg = pack_items(self.signature.param(), args)?;
        let callback = self.callback().ok_or(ViewError::Revoked)?;
        let Some(result) = callback.call(caller, budget, arg) else {
            return Ok(None);
        };
        if result.matches(self.signature.ret()) {
            return Ok(Some(result));
        }
        let fault = ConversionFault::mismatch(self.signature.ret().to_string(), result.kind().to_string());
        match callback.owner() {
            Some(owner) => owner.avatar().fail(AvatarError::Conversion(fault)),
            None => tracing::warn!(error = %fault, "Host callback returned an ill-typed value"),
        }
        Ok(None)
    }
}

impl Revocable for FuncView {
    fn lifecycle(&self) -> Lifecycle {
        self.slot.lifecycle()
    }

    fn revoke(&self) {
        self.slot.revoke();
    }

    fn adopt(&self, child: Weak<dyn Revocable>) -> bool {
        self.slot.adopt(child)
    }
}

impl fmt::Debug for FuncView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncView")
            .field("signature", &self.signature.to_string())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

type NativeBody = dyn Fn(CallbackItem) -> Result<CallbackItem, AvatarError> + Send + Sync;

/// A host function offered to scripts, such as the cancel hook passed with
/// input events. Failures are logged since there is no avatar to blame.
pub struct NativeCallback {
    signature: FuncType,
    body: Box<NativeBody>,
}

impl NativeCallback {
    pub fn new(
        signature: FuncType,
        body: impl Fn(CallbackItem) -> Result<CallbackItem, AvatarError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            signature,
            body: Box::new(body),
        }
    }
}

impl ScriptCallback for NativeCallback {
    fn signature(&self) -> &FuncType {
        &self.signature
    }

    fn owner(&self) -> Option<AvatarHandle<dyn Avatar>> {
        None
    }

    fn call(
        &self,
        _caller: Option<&AvatarHandle<dyn Avatar>>,
        _budget: Duration,
        arg: CallbackItem,
    ) -> Option<CallbackItem> {
        match (self.body)(arg) {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::warn!(signature = %self.signature, error = %err, "Native callback failed");
                None
            }
        }
    }
}

impl fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeCallback")
            .field("signature", &self.signature.to_string())
            .finish_non_exhaustive()
    }
}
