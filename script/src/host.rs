//! Everything a scripted avatar needs from the process hosting it.

use std::fmt;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use marionette_exchange::EventRegistry;
use marionette_runtime::Watchdog;
use marionette_types::{ErrorReporter, StandardCategories};

use crate::avatar::ScriptedAvatar;

/// Wall-clock budget per kind of script work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budgets {
    /// Top-level statements plus `init`.
    pub init: Duration,
    pub tick: Duration,
    pub render: Duration,
    /// Each callback invocation, including event delivery.
    pub callback: Duration,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            init: Duration::from_millis(5000),
            tick: Duration::from_millis(50),
            render: Duration::from_millis(20),
            callback: Duration::from_millis(10),
        }
    }
}

/// Every avatar created against one host, so `emit` can reach the others.
#[derive(Default)]
pub(crate) struct Peers {
    avatars: Mutex<Vec<Weak<ScriptedAvatar>>>,
}

impl Peers {
    pub(crate) fn join(&self, avatar: Weak<ScriptedAvatar>) {
        let mut avatars = self.avatars.lock().unwrap_or_else(PoisonError::into_inner);
        avatars.retain(|peer| peer.strong_count() > 0);
        avatars.push(avatar);
    }

    /// Live avatars other than `avatar`, in creation order.
    pub(crate) fn others(&self, avatar: &ScriptedAvatar) -> Vec<Arc<ScriptedAvatar>> {
        self.avatars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|peer| !ptr::eq(Arc::as_ptr(peer), avatar))
            .collect()
    }

    fn len(&self) -> usize {
        self.avatars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|peer| peer.strong_count() > 0)
            .count()
    }
}

/// Shared services, cloned into every avatar.
#[derive(Clone)]
pub struct ScriptHost {
    pub(crate) watchdog: Arc<Watchdog>,
    pub(crate) categories: StandardCategories,
    pub(crate) events: Arc<EventRegistry>,
    pub(crate) reporter: Arc<dyn ErrorReporter>,
    pub(crate) budgets: Budgets,
    pub(crate) memory_limit: usize,
    pub(crate) peers: Arc<Peers>,
}

impl ScriptHost {
    pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

    /// `categories` must be ids from the watchdog's own category registry.
    pub fn new(
        watchdog: Arc<Watchdog>,
        categories: StandardCategories,
        events: Arc<EventRegistry>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            watchdog,
            categories,
            events,
            reporter,
            budgets: Budgets::default(),
            memory_limit: Self::DEFAULT_MEMORY_LIMIT,
            peers: Arc::new(Peers::default()),
        }
    }

    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Bytes of lent values each avatar may hold at once.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    #[must_use]
    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    #[must_use]
    pub fn categories(&self) -> StandardCategories {
        self.categories
    }

    #[must_use]
    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    #[must_use]
    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.reporter
    }

    #[must_use]
    pub fn budgets(&self) -> Budgets {
        self.budgets
    }

    #[must_use]
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }
}

impl fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHost")
            .field("events", &self.events.len())
            .field("budgets", &self.budgets)
            .field("memory_limit", &self.memory_limit)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}
