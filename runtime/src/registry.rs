//! Concurrent registry of loaded and loading avatars for one keyspace.
//!
//! State-as-location: an avatar is "loading" because its key is in
//! `in_progress` and "loaded" because its key is in `loaded`. Promotion is
//! the move between the two maps. There are no status flags.
//!
//! Creation runs on the runtime's blocking pool and cannot be cancelled.
//! Each task hands its result over through a shared slot. Cancelling marks
//! the slot, and a task that finds its slot marked destroys what it built
//! before exiting, so teardown does not depend on the runtime outliving it.
//!
//! Lock order: an `in_progress` shard may be held while touching `loaded`,
//! never the reverse.

use std::fmt;
use std::hash::Hash;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use marionette_types::{Avatar, AvatarError, AvatarFailure, ErrorReporter, UnexpectedError};
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use crate::handle::AvatarHandle;

/// Outcome of a creation task. `Ok(None)` means there was nothing to load.
pub type CreationResult<A> = Result<Option<AvatarHandle<A>>, AvatarFailure>;

/// Where a creation task leaves its result.
enum Slot<A: Avatar> {
    Running,
    Cancelled,
    Finished(CreationResult<A>),
}

impl<A: Avatar> Slot<A> {
    fn take_finished(&mut self) -> Option<CreationResult<A>> {
        match mem::replace(self, Slot::Running) {
            Slot::Finished(result) => Some(result),
            other => {
                *self = other;
                None
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs on the creation thread once `creation` returns.
fn settle<A: Avatar>(slot: &Mutex<Slot<A>>, result: CreationResult<A>) {
    let mut slot = lock(slot);
    if matches!(*slot, Slot::Cancelled) {
        drop(slot);
        if let Ok(Some(handle)) = result {
            tracing::debug!("Destroying avatar from cancelled creation");
            handle.avatar().destroy();
        }
        return;
    }
    *slot = Slot::Finished(result);
}

enum Creation<A: Avatar> {
    Running {
        slot: Arc<Mutex<Slot<A>>>,
        /// Only consulted for a panic that kept the slot from being filled.
        task: JoinHandle<()>,
    },
    /// Finished, but the avatar has not reported ready yet.
    Constructed(AvatarHandle<A>),
}

enum Progress {
    Pending,
    Failed(AvatarFailure),
    Empty,
    Ready,
}

impl<A: Avatar> Creation<A> {
    /// Non-blocking: inspects a finished task, never waits on a running one.
    fn advance(&mut self) -> Progress {
        if let Creation::Running { slot, task } = self {
            if !task.is_finished() {
                return Progress::Pending;
            }
            let stored = lock(slot).take_finished();
            let result = match stored {
                Some(result) => result,
                None => match task.now_or_never() {
                    Some(Err(err)) => Err(join_failure(err)),
                    Some(Ok(())) => Ok(None),
                    None => return Progress::Pending,
                },
            };
            match result {
                Ok(Some(handle)) => *self = Creation::Constructed(handle),
                Ok(None) => return Progress::Empty,
                Err(failure) => return Progress::Failed(failure),
            }
        }
        match self {
            Creation::Constructed(handle) if handle.avatar().is_ready() => Progress::Ready,
            _ => Progress::Pending,
        }
    }

    /// Destroy whatever this creation produced or will produce.
    fn discard(self) {
        match self {
            Creation::Constructed(handle) => handle.avatar().destroy(),
            Creation::Running { slot, .. } => {
                let mut slot = lock(&slot);
                if let Slot::Finished(Ok(Some(handle))) = mem::replace(&mut *slot, Slot::Cancelled) {
                    drop(slot);
                    handle.avatar().destroy();
                }
            }
        }
    }
}

fn join_failure(err: JoinError) -> AvatarFailure {
    if err.is_panic() {
        UnexpectedError::from_panic(err.into_panic().as_ref()).into()
    } else {
        UnexpectedError::new(err.to_string()).into()
    }
}

/// Keyed collection of avatars with asynchronous, non-cancellable creation.
///
/// All methods take `&self` and are safe to call from any thread. `poll`
/// and `for_each` never let a failure from one avatar escape or stop the
/// others from being processed.
pub struct AvatarRegistry<K, A: Avatar> {
    loaded: DashMap<K, AvatarHandle<A>>,
    in_progress: DashMap<K, Creation<A>>,
    runtime: Handle,
    reporter: Arc<dyn ErrorReporter>,
}

impl<K, A> AvatarRegistry<K, A>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    A: Avatar,
{
    /// Creation tasks run on `runtime`'s blocking pool.
    pub fn new(runtime: Handle, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            loaded: DashMap::new(),
            in_progress: DashMap::new(),
            runtime,
            reporter,
        }
    }

    /// Start creating an avatar for `key`.
    ///
    /// Any creation already in progress for `key` is cancelled first, so
    /// only the latest task can ever be promoted. A loaded avatar stays in
    /// place until its replacement is promoted.
    pub fn load<F>(&self, key: K, creation: F)
    where
        F: FnOnce() -> CreationResult<A> + Send + 'static,
    {
        self.cancel_in_progress(&key);
        tracing::debug!(key = ?key, "Launching avatar creation");
        let slot = Arc::new(Mutex::new(Slot::Running));
        let task = self.runtime.spawn_blocking({
            let slot = Arc::clone(&slot);
            move || settle(&slot, creation())
        });
        if let Some(previous) = self.in_progress.insert(key, Creation::Running { slot, task }) {
            // Lost a race with another `load` for the same key.
            previous.discard();
        }
    }

    /// Promote finished, ready creations and report failed ones.
    ///
    /// Never blocks on a running task. Avatars that finished constructing
    /// but are not ready yet stay in progress and are retried next call.
    pub fn poll(&self) {
        let keys: Vec<K> = self.in_progress.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            let Entry::Occupied(mut entry) = self.in_progress.entry(key) else {
                continue;
            };
            match entry.get_mut().advance() {
                Progress::Pending => {}
                Progress::Empty => {
                    let (key, _) = entry.remove_entry();
                    tracing::debug!(key = ?key, "Creation produced nothing to load");
                }
                Progress::Failed(failure) => {
                    let (key, _) = entry.remove_entry();
                    self.reporter.report(&format!("{key:?}"), &failure);
                }
                Progress::Ready => {
                    let (key, creation) = entry.remove_entry();
                    if let Creation::Constructed(handle) = creation {
                        self.promote(key, handle);
                    }
                }
            }
        }
    }

    fn promote(&self, key: K, handle: AvatarHandle<A>) {
        tracing::debug!(key = ?key, "Promoting avatar");
        if let Some(replaced) = self.loaded.insert(key, handle) {
            replaced.avatar().destroy();
        }
    }

    /// Handle to the loaded avatar for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<AvatarHandle<A>> {
        self.loaded.get(key).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn is_in_progress(&self, key: &K) -> bool {
        self.in_progress.contains_key(key)
    }

    #[must_use]
    pub fn is_loaded(&self, key: &K) -> bool {
        self.loaded.contains_key(key)
    }

    #[must_use]
    pub fn loaded_len(&self) -> usize {
        self.loaded.len()
    }

    #[must_use]
    pub fn in_progress_len(&self) -> usize {
        self.in_progress.len()
    }

    /// Remove and destroy the loaded avatar for `key`. No-op if absent.
    pub fn unload(&self, key: &K) {
        if let Some((key, handle)) = self.loaded.remove(key) {
            tracing::debug!(key = ?key, "Unloading avatar");
            handle.avatar().destroy();
        }
    }

    /// Stop tracking the in-progress creation for `key`.
    ///
    /// The task keeps running; whatever it produces is destroyed on its
    /// own thread and never promoted.
    pub fn cancel_in_progress(&self, key: &K) {
        if let Some((key, creation)) = self.in_progress.remove(key) {
            tracing::debug!(key = ?key, "Cancelling avatar creation");
            creation.discard();
        }
    }

    /// Cancel every creation still in progress.
    pub fn cancel_all_in_progress(&self) {
        let in_progress: Vec<K> = self.in_progress.iter().map(|entry| entry.key().clone()).collect();
        for key in &in_progress {
            self.cancel_in_progress(key);
        }
    }

    /// Cancel everything in progress and unload everything loaded.
    pub fn clear(&self) {
        self.cancel_all_in_progress();
        let loaded: Vec<K> = self.loaded.iter().map(|entry| entry.key().clone()).collect();
        for key in &loaded {
            self.unload(key);
        }
    }

    /// Visit every loaded avatar through a fresh handle.
    ///
    /// Errors returned by `visitor` mark that avatar errored; panics mark it
    /// with an unexpected failure. Either way the pass continues. Handles
    /// are snapshotted first so the visitor may call back into the registry.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&K, &Arc<A>) -> Result<(), AvatarError>,
    {
        let snapshot: Vec<(K, AvatarHandle<A>)> = self
            .loaded
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, handle) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handle.with(|avatar| visitor(&key, avatar))
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => handle.avatar().error(AvatarFailure::Domain(err)),
                Err(payload) => {
                    let err = UnexpectedError::from_panic(payload.as_ref());
                    tracing::debug!(key = ?key, error = %err, "Visitor panicked");
                    handle.avatar().error(AvatarFailure::Unexpected(err));
                }
            }
        }
    }
}
