//! The scripted avatar.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use marionette_exchange::{
    CallbackItem, CallbackType, Converter, EventId, EventListener, EventRegistry, FuncType,
    Lender, QueueError, Revocable, ViewRoot, convert,
};
use marionette_runtime::{
    AllocationLimit, AvatarErrorState, AvatarHandle, AvatarProfiling, CreationResult,
    WeakAvatarHandle,
};
use marionette_types::{
    AllocationTracker, Avatar, AvatarError, AvatarFailure, CategoryId, ConversionFault,
    ProfilingSink, ThreadSafety,
};
use rhai::{
    AST, CallFnOptions, Dynamic, Engine, EvalAltResult, FLOAT, FnPtr, FuncArgs, Map, Scope,
};

use crate::api::{self, ScriptRegistration};
use crate::convert::{RhaiConverter, return_values};
use crate::host::{Budgets, ScriptHost};

/// Top-level constant a script sets to `true` to declare itself
/// thread-safe. Anything else, including leaving it out, is unsafe.
pub const THREAD_SAFE: &str = "THREAD_SAFE";

/// One listener per registered event, owned by a single avatar.
///
/// Exposed as an avatar component, so it disappears once the avatar errors.
pub struct Listeners {
    listeners: Vec<EventListener>,
}

impl Listeners {
    fn new(events: &EventRegistry, owner: &Weak<dyn Avatar>) -> Self {
        let listeners = events
            .iter()
            .filter_map(|(id, _)| EventListener::new(id, events, Weak::clone(owner)))
            .collect();
        Self { listeners }
    }

    #[must_use]
    pub fn get(&self, event: EventId) -> Option<&EventListener> {
        self.listeners.iter().find(|listener| listener.event() == event)
    }

    /// Callbacks registered across all events.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.listeners.iter().map(EventListener::len).sum()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("events", &self.listeners.len())
            .field("registered", &self.registered())
            .finish()
    }
}

/// Which optional entry points the script defines.
#[derive(Debug, Clone, Copy, Default)]
struct EntryPoints {
    init: bool,
    tick: bool,
    render: bool,
}

impl EntryPoints {
    fn scan(ast: &AST) -> Self {
        let defines = |name: &str, arity: usize| {
            ast.iter_functions()
                .any(|function| function.name == name && function.params.len() == arity)
        };
        Self {
            init: defines("init", 0),
            tick: defines("tick", 0),
            render: defines("render", 1),
        }
    }
}

/// Interpreter state that survives between entry point calls.
struct Session {
    scope: Scope<'static>,
    /// Bound as `this` for every entry point.
    state: Dynamic,
}

fn declared_safety(ast: &AST) -> ThreadSafety {
    let safe = ast
        .iter_literal_variables(true, false)
        .find(|(name, _, _)| *name == THREAD_SAFE)
        .and_then(|(_, _, value)| value.as_bool().ok())
        .unwrap_or(false);
    if safe {
        ThreadSafety::Safe
    } else {
        ThreadSafety::Unsafe
    }
}

fn script_error(err: &EvalAltResult) -> AvatarError {
    AvatarError::script(err.to_string())
}

/// An avatar whose behavior is a rhai script.
///
/// Every value the script lends out is anchored at the avatar's view root
/// and charged to its allocation limit. [`Avatar::destroy`] revokes the
/// root, so nothing the script handed out stays usable.
pub struct ScriptedAvatar {
    name: String,
    engine: Engine,
    ast: AST,
    session: Mutex<Session>,
    entry_points: EntryPoints,
    safety: ThreadSafety,
    root: Arc<ViewRoot>,
    limit: Arc<AllocationLimit>,
    lender: Lender,
    this: Weak<ScriptedAvatar>,
    state: AvatarErrorState,
    profiling: AvatarProfiling,
    listeners: Listeners,
    host: ScriptHost,
    handle: OnceLock<WeakAvatarHandle<dyn Avatar>>,
    ready: AtomicBool,
    destroyed: AtomicBool,
}

impl ScriptedAvatar {
    /// Compile `source` and run its top level and `init`.
    ///
    /// Only a compile error fails creation. A script that errors while
    /// initializing is still returned, already errored, so the host can
    /// show it.
    pub fn create(name: impl Into<String>, source: &str, host: &ScriptHost) -> CreationResult<Self> {
        let name = name.into();
        let ast = api::base_engine()
            .compile(source)
            .map_err(|err| AvatarFailure::Domain(AvatarError::Init(err.to_string())))?;
        let safety = declared_safety(&ast);
        let entry_points = EntryPoints::scan(&ast);
        tracing::debug!(avatar = %name, safety = %safety, "Compiled script");

        let avatar = Arc::new_cyclic(|this: &Weak<Self>| {
            let owner: Weak<dyn Avatar> = this.clone();
            let root = ViewRoot::new(());
            let limit = Arc::new(AllocationLimit::new(host.memory_limit));
            let anchor: Arc<dyn Revocable> = root.clone();
            let tracker: Arc<dyn AllocationTracker> = limit.clone();
            let mut engine = api::base_engine();
            api::bind(&mut engine, this);
            Self {
                engine,
                ast,
                session: Mutex::new(Session {
                    scope: Scope::new(),
                    state: Dynamic::from_map(Map::new()),
                }),
                entry_points,
                safety,
                root,
                limit,
                lender: Lender::avatar(anchor, tracker, Weak::clone(&owner)),
                this: this.clone(),
                state: AvatarErrorState::new(name.clone(), Arc::clone(&host.reporter)),
                profiling: AvatarProfiling::new(host.watchdog.categories()),
                listeners: Listeners::new(&host.events, &owner),
                host: host.clone(),
                handle: OnceLock::new(),
                ready: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                name,
            }
        });

        let handle = AvatarHandle::from_arc(avatar);
        let installed = handle.avatar().handle.set(handle.erase().downgrade()).is_ok();
        debug_assert!(installed, "avatar handle installed twice");
        host.peers.join(Arc::downgrade(handle.avatar()));
        handle.with(|avatar| avatar.initialize());
        Ok(Some(handle))
    }

    fn initialize(self: &Arc<Self>) {
        let categories = self.host.categories;
        self.host.watchdog.run_timed(
            self,
            categories.initialization,
            self.host.budgets.init,
            || {
                let mut session = self.session();
                self.engine
                    .run_ast_with_scope(&mut session.scope, &self.ast)
                    .map_err(|err| script_error(&err))?;
                if self.entry_points.init {
                    self.call_entry(&mut session, "init", ())?;
                }
                Ok(())
            },
        );
        self.ready.store(true, Ordering::Release);
        tracing::debug!(avatar = %self.name, errored = self.is_errored(), "Initialized script");
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call_entry(&self, session: &mut Session, name: &str, args: impl FuncArgs) -> Result<(), AvatarError> {
        let Session { scope, state } = session;
        let options = CallFnOptions::new().eval_ast(false).bind_this_ptr(state);
        self.engine
            .call_fn_with_options::<Dynamic>(options, scope, &self.ast, name, args)
            .map(drop)
            .map_err(|err| script_error(&err))
    }

    fn run_entry(
        self: &Arc<Self>,
        defined: bool,
        name: &str,
        category: CategoryId,
        budget: Duration,
        args: impl FuncArgs,
    ) -> Result<(), AvatarError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(AvatarError::Unloaded);
        }
        if !defined || self.is_errored() {
            return Ok(());
        }
        self.host.watchdog.run_timed(self, category, budget, || {
            let mut session = self.session();
            self.call_entry(&mut session, name, args)
        });
        Ok(())
    }

    /// Run `tick()` under the tick budget. A no-op once errored.
    ///
    /// Call through the avatar's handle so thread-unsafe scripts are
    /// serialized. Fails only if the avatar was already destroyed.
    pub fn tick(self: &Arc<Self>) -> Result<(), AvatarError> {
        let categories = self.host.categories;
        self.run_entry(
            self.entry_points.tick,
            "tick",
            categories.client_tick,
            self.host.budgets.tick,
            (),
        )
    }

    /// Run `render(delta)` under the render budget. A no-op once errored.
    pub fn render(self: &Arc<Self>, delta: f32) -> Result<(), AvatarError> {
        let categories = self.host.categories;
        self.run_entry(
            self.entry_points.render,
            "render",
            categories.client_render,
            self.host.budgets.render,
            (FLOAT::from(delta),),
        )
    }

    /// Deliver `event` to this avatar's listeners. Returns whether a
    /// listener returned `true`.
    ///
    /// `caller` must be this avatar's own handle only when the caller
    /// already holds it, as inside [`marionette_runtime::AvatarRegistry::for_each`].
    pub fn deliver(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        event: EventId,
        args: &[CallbackItem],
    ) -> Result<bool, ConversionFault> {
        let Some(listener) = self.listeners.get(event) else {
            return Ok(false);
        };
        listener.invoke_canceling(caller, self.host.budgets.callback, args)
    }

    /// Queue `event` on every other live avatar of this host that listens
    /// for it. Returns how many avatars it was queued on.
    ///
    /// Arguments are converted here, so a bad one errors this avatar. A
    /// receiver whose queue is full just misses the event.
    pub(crate) fn emit(&self, event: &str, args: Vec<Dynamic>) -> Result<usize, Box<EvalAltResult>> {
        let unknown = || api::raise(self, AvatarError::script(format!("unknown event '{event}'")));
        let id = self.host.events.find(event).ok_or_else(unknown)?;
        let param = self.host.events.get(id).ok_or_else(unknown)?.signature().param();
        let items = convert::args_to_item(&self.converter(), param, args)
            .map(|item| convert::spread(param, item))
            .map_err(|fault| api::raise(self, fault.into()))?;

        let mut queued = 0;
        for peer in self.host.peers.others(self) {
            let Some(listener) = peer.listeners.get(id) else {
                continue;
            };
            if peer.is_errored() || listener.is_empty() {
                continue;
            }
            match listener.queue_invocation(items.clone()) {
                Ok(()) => queued += 1,
                Err(QueueError::Conversion(fault)) => return Err(api::raise(self, fault.into())),
                Err(err @ QueueError::Full { .. }) => {
                    tracing::warn!(avatar = %self.name, peer = %peer.name, error = %err, "Dropping emitted event");
                }
            }
        }
        Ok(queued)
    }

    /// Deliver invocations other avatars queued for this one, oldest first.
    pub fn drain_queued(&self, caller: Option<&AvatarHandle<dyn Avatar>>) -> usize {
        self.listeners
            .listeners
            .iter()
            .map(|listener| listener.drain_queued(caller, self.host.budgets.callback))
            .sum()
    }

    /// Convert the top-level variable `name` to an item of type `ty`, lent
    /// by this avatar.
    ///
    /// Returns `Ok(None)` if the script has no such variable.
    pub fn export(&self, name: &str, ty: &CallbackType) -> Result<Option<CallbackItem>, ConversionFault> {
        let Some(value) = self.session().scope.get_value::<Dynamic>(name) else {
            return Ok(None);
        };
        self.converter().to_item(ty, value).map(Some)
    }

    /// A property of the `this` map entry points share.
    #[must_use]
    pub fn state_value(&self, key: &str) -> Option<Dynamic> {
        let session = self.session();
        session
            .state
            .read_lock::<Map>()
            .and_then(|state| state.get(key).cloned())
    }

    /// Run a script function on the calling thread under `budget`.
    ///
    /// The caller has already taken this avatar's lock if it needs one. An
    /// argument that does not fit `signature` is the caller's mistake and
    /// leaves this avatar untouched.
    pub(crate) fn call_function(
        self: &Arc<Self>,
        function: &FnPtr,
        signature: &FuncType,
        budget: Duration,
        arg: CallbackItem,
    ) -> Option<CallbackItem> {
        if self.is_errored() {
            return None;
        }
        if !arg.matches(signature.param()) {
            tracing::warn!(avatar = %self.name, expected = %signature.param(), actual = %arg.kind(), "Rejecting ill-typed callback argument");
            return None;
        }
        let converter = self.converter();
        let args = match convert::item_to_natives(&converter, signature.param(), arg) {
            Ok(args) => args,
            Err(fault) => {
                tracing::warn!(avatar = %self.name, error = %fault, "Rejecting callback argument");
                return None;
            }
        };
        let categories = self.host.categories;
        self.host
            .watchdog
            .run_timed_for(self, categories.callback, budget, || {
                let result = function
                    .call::<Dynamic>(&self.engine, &self.ast, args)
                    .map_err(|err| script_error(&err))?;
                let values = return_values(signature.ret(), result);
                Ok(convert::returns_to_item(&converter, signature.ret(), values)?)
            })
    }

    pub(crate) fn listen(
        &self,
        event: &str,
        function: FnPtr,
    ) -> Result<ScriptRegistration, Box<EvalAltResult>> {
        let listener = self
            .host
            .events
            .find(event)
            .and_then(|id| self.listeners.get(id))
            .ok_or_else(|| api::raise(self, AvatarError::script(format!("unknown event '{event}'"))))?;
        let ty = CallbackType::Func(Box::new(listener.signature().clone()));
        let view = match self.converter().to_item(&ty, Dynamic::from(function)) {
            Ok(CallbackItem::Func(view)) => view,
            Ok(other) => {
                let fault = ConversionFault::mismatch(ty.to_string(), other.kind().to_string());
                return Err(api::raise(self, fault.into()));
            }
            Err(fault) => return Err(api::raise(self, fault.into())),
        };
        let registration = listener
            .register(view)
            .map_err(|fault| api::raise(self, fault.into()))?;
        Ok(ScriptRegistration {
            event: listener.event(),
            registration,
        })
    }

    pub(crate) fn unlisten(&self, registration: ScriptRegistration) {
        if let Some(listener) = self.listeners.get(registration.event) {
            listener.remove(registration.registration);
        }
    }

    pub(crate) fn converter(&self) -> RhaiConverter {
        RhaiConverter::new(self.lender.clone(), self.this.clone())
    }

    pub(crate) fn budgets(&self) -> Budgets {
        self.host.budgets
    }

    /// The erased handle the registry holds, with its lock.
    #[must_use]
    pub fn handle(&self) -> Option<AvatarHandle<dyn Avatar>> {
        self.handle.get().and_then(WeakAvatarHandle::upgrade)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn failure(&self) -> Option<&AvatarFailure> {
        self.state.get()
    }

    #[must_use]
    pub fn profiling(&self) -> &AvatarProfiling {
        &self.profiling
    }

    #[must_use]
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Bytes currently charged for values this avatar has lent out.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.limit.used()
    }
}

impl Avatar for ScriptedAvatar {
    fn thread_safety(&self) -> ThreadSafety {
        self.safety
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn is_errored(&self) -> bool {
        self.state.is_errored()
    }

    fn error(&self, failure: AvatarFailure) {
        self.state.set(failure);
    }

    fn profiler(&self) -> Option<&dyn ProfilingSink> {
        Some(&self.profiling)
    }

    fn component(&self, component: TypeId) -> Option<&(dyn Any + Send + Sync)> {
        if self.is_errored() {
            return None;
        }
        if component == TypeId::of::<Listeners>() {
            return Some(&self.listeners);
        }
        None
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(avatar = %self.name, "Destroying scripted avatar");
        self.root.revoke();
    }
}

impl fmt::Debug for ScriptedAvatar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedAvatar")
            .field("name", &self.name)
            .field("safety", &self.safety)
            .field("errored", &self.is_errored())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
