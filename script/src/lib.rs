//! Scripted avatars backed by the rhai engine.
//!
//! A [`ScriptedAvatar`] compiles one `.rhai` source and drives it through
//! three optional entry points, each under its own time budget:
//!
//! ```rhai
//! const THREAD_SAFE = false;
//!
//! fn init() { this.ticks = 0; }
//! fn tick() { this.ticks += 1; }
//! fn render(delta) { }
//!
//! on("key_press", |key, scancode, modifiers, cancel| key == 256);
//! ```
//!
//! Entry points share a `this` object map for state that outlives a call.
//! Lent callbacks run with `callback.invoke(...)`. Other avatars are
//! reached only through `emit("event", args...)`, which queues the event
//! for each listening avatar's next drain.
//! Values arriving from the host or other avatars are revocable views;
//! scripts read them with `copy()`, `get()`, `len()` and friends and must
//! expect `()` once a view is revoked.

#![allow(clippy::missing_errors_doc)]

mod api;
mod avatar;
mod callback;
mod convert;
mod host;

pub use avatar::{Listeners, ScriptedAvatar, THREAD_SAFE};
pub use host::{Budgets, ScriptHost};
