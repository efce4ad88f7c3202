//! Named events and the per-avatar listeners that deliver them.
//!
//! The event set is assembled once through a builder and then frozen, like
//! profiling categories. Every event's callbacks have signature
//! `Args -> bool`.
//!
//! Avatars never call into each other's listeners synchronously. Another
//! avatar queues an invocation; the owner drains the queue on its own turn.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use marionette_runtime::AvatarHandle;
use marionette_types::{Avatar, ConversionFault};
use thiserror::Error;

use crate::callback::FuncView;
use crate::convert::pack_items;
use crate::item::CallbackItem;
use crate::ty::{CallbackType, FuncType, TupleType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u16);

impl EventId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    name: String,
    signature: FuncType,
}

impl Event {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn signature(&self) -> &FuncType {
        &self.signature
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("duplicate event: {0}")]
    Duplicate(String),
    #[error("invalid event name: {0:?}")]
    InvalidName(String),
    #[error("too many events")]
    Exhausted,
}

/// Why a queued invocation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error(transparent)]
    Conversion(#[from] ConversionFault),
    #[error("invocation queue is full ({capacity} pending)")]
    Full { capacity: usize },
}

#[derive(Debug, Default)]
pub struct EventRegistryBuilder {
    events: Vec<Event>,
}

impl EventRegistryBuilder {
    /// Register an event whose callbacks take `args` and return `bool`.
    pub fn event(&mut self, name: &str, args: CallbackType) -> Result<EventId, EventError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(EventError::InvalidName(name.to_string()));
        }
        if self.events.iter().any(|event| event.name == name) {
            return Err(EventError::Duplicate(name.to_string()));
        }
        if u16::try_from(self.events.len()).is_err() {
            return Err(EventError::Exhausted);
        }
        Ok(self.push(name, args))
    }

    /// Append without validation. Callers have checked the name and id space.
    fn push(&mut self, name: &str, args: CallbackType) -> EventId {
        let id = EventId(self.events.len() as u16);
        self.events.push(Event {
            name: name.to_string(),
            signature: FuncType::new(args, CallbackType::Bool),
        });
        id
    }

    #[must_use]
    pub fn build(self) -> EventRegistry {
        EventRegistry {
            events: self.events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRegistry {
    events: Vec<Event>,
}

impl EventRegistry {
    #[must_use]
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    /// The events every host provides.
    #[must_use]
    pub fn standard() -> (Self, StandardEvents) {
        let mut builder = Self::builder();
        // The standard names are valid and distinct, so a fresh builder
        // needs no checks.
        let Ok(ids) =
            StandardEvents::layout(|name, args| Ok::<_, Infallible>(builder.push(name, args)));
        (builder.build(), ids)
    }

    #[must_use]
    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.index())
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<EventId> {
        self.events
            .iter()
            .position(|event| event.name == name)
            .and_then(|index| u16::try_from(index).ok())
            .map(EventId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventId, &Event)> {
        self.events
            .iter()
            .enumerate()
            .filter_map(|(index, event)| Some((EventId(u16::try_from(index).ok()?), event)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardEvents {
    pub client_tick: EventId,
    pub entity_tick: EventId,
    pub client_render: EventId,
    pub world_render: EventId,
    pub entity_render: EventId,
    /// `(key, scancode, modifiers, cancel)`.
    pub key_press: EventId,
    /// `(text, cancel)`.
    pub char_typed: EventId,
}

impl StandardEvents {
    /// Register the standard events into a builder that may already hold
    /// host-specific ones.
    pub fn register(builder: &mut EventRegistryBuilder) -> Result<Self, EventError> {
        Self::layout(|name, args| builder.event(name, args))
    }

    fn layout<E>(mut add: impl FnMut(&str, CallbackType) -> Result<EventId, E>) -> Result<Self, E> {
        let cancel = || CallbackType::func(CallbackType::Unit, CallbackType::Unit);
        Ok(Self {
            client_tick: add("client_tick", CallbackType::Unit)?,
            entity_tick: add("entity_tick", CallbackType::Entity)?,
            client_render: add("client_render", CallbackType::F32)?,
            world_render: add("world_render", CallbackType::F32)?,
            entity_render: add(
                "entity_render",
                CallbackType::Tuple(TupleType::of([CallbackType::F32, CallbackType::Entity])),
            )?,
            key_press: add(
                "key_press",
                CallbackType::Tuple(TupleType::of([
                    CallbackType::I32,
                    CallbackType::I32,
                    CallbackType::I32,
                    cancel(),
                ])),
            )?,
            char_typed: add(
                "char_typed",
                CallbackType::Tuple(TupleType::of([CallbackType::Str, cancel()])),
            )?,
        })
    }
}

/// Removes its callback from the listener on the next delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

#[derive(Default)]
struct ListenerState {
    callbacks: Vec<(Registration, Arc<FuncView>)>,
    removals: Vec<Registration>,
    queued: VecDeque<Vec<CallbackItem>>,
    next_id: u64,
}

/// Callbacks one avatar registered for one event.
pub struct EventListener {
    event: EventId,
    signature: FuncType,
    owner: Weak<dyn Avatar>,
    state: Mutex<ListenerState>,
}

impl EventListener {
    /// Most invocations that may wait for the owner's next drain.
    pub const MAX_QUEUED: usize = 256;

    pub fn new(event: EventId, registry: &EventRegistry, owner: Weak<dyn Avatar>) -> Option<Self> {
        let signature = registry.get(event)?.signature.clone();
        Some(Self {
            event,
            signature,
            owner,
            state: Mutex::new(ListenerState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn event(&self) -> EventId {
        self.event
    }

    #[must_use]
    pub fn signature(&self) -> &FuncType {
        &self.signature
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().callbacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a callback. Its signature must equal the event's.
    pub fn register(&self, callback: Arc<FuncView>) -> Result<Registration, ConversionFault> {
        if callback.signature() != &self.signature {
            return Err(ConversionFault::mismatch(
                self.signature.to_string(),
                callback.signature().to_string(),
            ));
        }
        let mut state = self.lock();
        let registration = Registration(state.next_id);
        state.next_id += 1;
        state.callbacks.push((registration, callback));
        Ok(registration)
    }

    /// Takes effect at the start of the next delivery, so a callback may
    /// remove itself while running.
    pub fn remove(&self, registration: Registration) {
        self.lock().removals.push(registration);
    }

    fn snapshot(&self) -> Vec<Arc<FuncView>> {
        let mut state = self.lock();
        let removals = mem::take(&mut state.removals);
        if !removals.is_empty() {
            state
                .callbacks
                .retain(|(registration, _)| !removals.contains(registration));
        }
        state.callbacks.iter().map(|(_, callback)| Arc::clone(callback)).collect()
    }

    fn owner_errored(&self) -> bool {
        self.owner.upgrade().is_none_or(|owner| owner.is_errored())
    }

    /// Deliver to each callback in registration order until `stop` holds for
    /// a result. Returns whether delivery was stopped early.
    ///
    /// Nothing is delivered once the owner is errored, including partway
    /// through. Per-callback failures are routed by the callback; a revoked
    /// callback is skipped.
    pub fn invoke_until(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        budget: Duration,
        args: &[CallbackItem],
        mut stop: impl FnMut(&CallbackItem) -> bool,
    ) -> Result<bool, ConversionFault> {
        pack_items(self.signature.param(), args.to_vec())?;
        for callback in self.snapshot() {
            if self.owner_errored() {
                tracing::debug!(event = self.event.index(), "Skipping delivery to errored avatar");
                return Ok(false);
            }
            match callback.invoke(caller, budget, args.to_vec()) {
                Ok(Some(result)) if stop(&result) => return Ok(true),
                Ok(_) => {}
                Err(err) => tracing::debug!(error = %err, "Skipping callback"),
            }
        }
        Ok(false)
    }

    /// Deliver to every callback, ignoring results.
    pub fn invoke(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        budget: Duration,
        args: &[CallbackItem],
    ) -> Result<(), ConversionFault> {
        self.invoke_until(caller, budget, args, |_| false).map(|_| ())
    }

    /// Deliver until a callback returns `true`. Returns whether one did.
    pub fn invoke_canceling(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        budget: Duration,
        args: &[CallbackItem],
    ) -> Result<bool, ConversionFault> {
        self.invoke_until(caller, budget, args, |result| {
            matches!(result, CallbackItem::Bool(true))
        })
    }

    /// Deliver to every callback and collect the results of those that ran.
    pub fn invoke_to_list(
        &self,
        caller: Option<&AvatarHandle<dyn Avatar>>,
        budget: Duration,
        args: &[CallbackItem],
    ) -> Result<Vec<CallbackItem>, ConversionFault> {
        let mut results = Vec::new();
        self.invoke_until(caller, budget, args, |result| {
            results.push(result.clone());
            false
        })?;
        Ok(results)
    }

    /// Queue a delivery requested by another avatar. Arguments are checked
    /// now so the requester is blamed for bad ones. Refused once
    /// [`Self::MAX_QUEUED`] invocations are waiting.
    pub fn queue_invocation(&self, args: Vec<CallbackItem>) -> Result<(), QueueError> {
        pack_items(self.signature.param(), args.clone())?;
        let mut state = self.lock();
        if state.queued.len() >= Self::MAX_QUEUED {
            return Err(QueueError::Full {
                capacity: Self::MAX_QUEUED,
            });
        }
        state.queued.push_back(args);
        Ok(())
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    /// Oldest queued delivery, if any.
    #[must_use]
    pub fn poll_invocation(&self) -> Option<Vec<CallbackItem>> {
        self.lock().queued.pop_front()
    }

    /// Deliver every queued invocation. Returns how many were delivered.
    pub fn drain_queued(&self, caller: Option<&AvatarHandle<dyn Avatar>>, budget: Duration) -> usize {
        let mut delivered = 0;
        while let Some(args) = self.poll_invocation() {
            if self.invoke(caller, budget, &args).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("EventListener")
            .field("event", &self.event)
            .field("callbacks", &state.callbacks.len())
            .field("queued", &state.queued.len())
            .finish_non_exhaustive()
    }
}
