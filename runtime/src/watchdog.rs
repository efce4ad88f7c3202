//! Wall-clock budget enforcement for avatar-attributed operations.
//!
//! A single background thread wakes every `resolution` and fires the killer
//! of each task that has outlived its budget. Firing never interrupts the
//! thread running the operation; it only marks the owner errored and makes
//! the eventual result void. Overrun is therefore bounded by
//! `budget + resolution` plus scheduling noise.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use marionette_types::{
    Avatar, AvatarError, AvatarFailure, CategoryId, ProfilingCategories, UnexpectedError,
};

/// Identifies one registered task. Never reused within a watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

type Killer = Box<dyn FnOnce() + Send>;

struct WatchdogTask {
    killer: Mutex<Killer>,
    started: Instant,
    budget: Duration,
}

impl WatchdogTask {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) > self.budget
    }
}

struct Shared {
    tasks: DashMap<TaskId, WatchdogTask>,
    next_id: AtomicU64,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    /// Removal and firing are one step: whoever removes the task owns the
    /// killer, so it runs at most once and `end_task` afterwards sees nothing.
    fn fire_expired(&self, now: Instant) -> usize {
        let expired: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut fired = 0;
        for id in expired {
            let Some((_, task)) = self.tasks.remove_if(&id, |_, task| task.is_expired(now)) else {
                continue;
            };
            fired += 1;
            let elapsed = now.saturating_duration_since(task.started);
            tracing::debug!(
                task = id.0,
                budget_ms = task.budget.as_millis(),
                elapsed_ms = elapsed.as_millis(),
                "Watchdog firing"
            );
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(
                task.killer.into_inner().unwrap_or_else(PoisonError::into_inner),
            )) {
                let err = UnexpectedError::from_panic(payload.as_ref());
                tracing::error!(task = id.0, error = %err, "Watchdog killer panicked");
            }
        }
        fired
    }
}

/// Background monitor for time-budgeted operations.
///
/// Dropping the watchdog stops and joins its thread. Tasks still registered
/// at that point are discarded without firing.
pub struct Watchdog {
    shared: Arc<Shared>,
    categories: Arc<ProfilingCategories>,
    resolution: Duration,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(50);

    /// Spawn the monitor thread.
    pub fn start(resolution: Duration, categories: Arc<ProfilingCategories>) -> io::Result<Self> {
        let resolution = resolution.max(Duration::from_millis(1));
        let shared = Arc::new(Shared {
            tasks: DashMap::new(),
            next_id: AtomicU64::new(0),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread = thread::Builder::new()
            .name("marionette-watchdog".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(&shared, resolution)
            })?;
        tracing::debug!(resolution_ms = resolution.as_millis(), "Watchdog started");
        Ok(Self {
            shared,
            categories,
            resolution,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    #[must_use]
    pub fn categories(&self) -> &ProfilingCategories {
        &self.categories
    }

    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Register a task. `killer` runs on the watchdog thread, at most once,
    /// if the task is still live after `budget`.
    pub fn start_task(&self, budget: Duration, killer: impl FnOnce() + Send + 'static) -> TaskId {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.tasks.insert(
            id,
            WatchdogTask {
                killer: Mutex::new(Box::new(killer)),
                started: Instant::now(),
                budget,
            },
        );
        id
    }

    /// Deregister a task. Returns `false` if it was already killed.
    pub fn end_task(&self, id: TaskId) -> bool {
        self.shared.tasks.remove(&id).is_some()
    }

    /// Run `operation` on this thread under a time budget.
    ///
    /// If the budget fires, `owner` is marked with [`AvatarError::BudgetExceeded`].
    /// If the operation returns an error, `owner` is marked with it. Elapsed
    /// time is recorded against `category` either way.
    pub fn run_timed<A>(
        &self,
        owner: &Arc<A>,
        category: CategoryId,
        budget: Duration,
        operation: impl FnOnce() -> Result<(), AvatarError>,
    ) where
        A: Avatar + ?Sized,
    {
        self.run_timed_for(owner, category, budget, operation);
    }

    /// Like [`Watchdog::run_timed`] but yields the operation's result.
    ///
    /// Returns `None` if the operation failed, or if the budget fired before
    /// the task could be deregistered. In the second case the result is
    /// discarded even though the operation completed, and side effects it
    /// already performed are kept.
    pub fn run_timed_for<A, R>(
        &self,
        owner: &Arc<A>,
        category: CategoryId,
        budget: Duration,
        operation: impl FnOnce() -> Result<R, AvatarError>,
    ) -> Option<R>
    where
        A: Avatar + ?Sized,
    {
        let target = Arc::downgrade(owner);
        let category_name = self.categories.full_name(category);
        let id = self.start_task(budget, move || {
            if let Some(owner) = target.upgrade() {
                owner.error(AvatarFailure::Domain(AvatarError::BudgetExceeded {
                    category: category_name,
                    budget,
                }));
            }
        });

        let mut guard = TaskGuard {
            watchdog: self,
            id,
            owner: owner.as_ref(),
            category,
            started: Instant::now(),
            live: true,
        };
        let outcome = operation();
        let finished_in_time = guard.end();

        match outcome {
            Ok(value) if finished_in_time => Some(value),
            Ok(_) => {
                tracing::debug!(task = id.0, "Discarding result of killed operation");
                None
            }
            Err(err) => {
                owner.error(AvatarFailure::Domain(err));
                None
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        *self
            .shared
            .stopped
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take()
            && thread.thread().id() != thread::current().id()
            && thread.join().is_err()
        {
            tracing::warn!("Watchdog thread panicked during shutdown");
        }
    }
}

fn run(shared: &Shared, resolution: Duration) {
    loop {
        {
            let stopped = shared.stopped.lock().unwrap_or_else(PoisonError::into_inner);
            let (stopped, _) = shared
                .wake
                .wait_timeout_while(stopped, resolution, |stopped| !*stopped)
                .unwrap_or_else(PoisonError::into_inner);
            if *stopped {
                return;
            }
        }
        shared.fire_expired(Instant::now());
    }
}

/// Deregisters the task and records profiling on every exit path,
/// including unwinding out of the operation.
struct TaskGuard<'a, A: Avatar + ?Sized> {
    watchdog: &'a Watchdog,
    id: TaskId,
    owner: &'a A,
    category: CategoryId,
    started: Instant,
    live: bool,
}

impl<A: Avatar + ?Sized> TaskGuard<'_, A> {
    fn end(&mut self) -> bool {
        self.live = false;
        self.watchdog.end_task(self.id)
    }
}

impl<A: Avatar + ?Sized> Drop for TaskGuard<'_, A> {
    fn drop(&mut self) {
        if self.live {
            self.watchdog.end_task(self.id);
        }
        if let Some(profiler) = self.owner.profiler() {
            profiler.record_time(self.category, self.started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn watchdog() -> Watchdog {
        let (categories, _) = ProfilingCategories::standard();
        Watchdog::start(Duration::from_millis(5), Arc::new(categories)).unwrap()
    }

    #[test]
    fn expired_task_fires_exactly_once() {
        let dog = watchdog();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = dog.start_task(Duration::from_millis(10), {
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        thread::sleep(Duration::from_millis(150));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!dog.end_task(id));
        assert_eq!(dog.live_tasks(), 0);
    }

    #[test]
    fn task_ended_early_never_fires() {
        let dog = watchdog();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = dog.start_task(Duration::from_millis(200), {
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(dog.end_task(id));

        thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fire_expired_skips_live_tasks() {
        let dog = watchdog();
        let id = dog.start_task(Duration::from_secs(60), || {});
        assert_eq!(dog.shared.fire_expired(Instant::now()), 0);
        assert!(dog.end_task(id));
    }

    #[test]
    fn panicking_killer_does_not_stop_the_monitor() {
        let dog = watchdog();
        dog.start_task(Duration::ZERO, || panic!("killer exploded"));
        let fired = Arc::new(AtomicUsize::new(0));
        dog.start_task(Duration::from_millis(5), {
            let fired = Arc::clone(&fired);
            move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });

        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_joins_monitor_thread() {
        let dog = watchdog();
        dog.start_task(Duration::from_secs(60), || {});
        drop(dog);
    }
}
