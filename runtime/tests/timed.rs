//! Budgeted execution: post-hoc marking, result discard, profiling.

use std::hint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use marionette_runtime::{AvatarErrorState, AvatarProfiling, TracingReporter, Watchdog};
use marionette_types::{
    Avatar, AvatarError, AvatarFailure, ProfilingCategories, ProfilingSink, StandardCategories,
    ThreadSafety,
};

struct Timed {
    state: AvatarErrorState,
    profiling: AvatarProfiling,
}

impl Avatar for Timed {
    fn thread_safety(&self) -> ThreadSafety {
        ThreadSafety::Safe
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
    fn destroy(&self) {}
}

fn setup() -> (Watchdog, StandardCategories, Arc<Timed>) {
    let (categories, ids) = ProfilingCategories::standard();
    let owner = Arc::new(Timed {
        state: AvatarErrorState::new("timed", Arc::new(TracingReporter)),
        profiling: AvatarProfiling::new(&categories),
    });
    let watchdog = Watchdog::start(Duration::from_millis(5), Arc::new(categories)).unwrap();
    (watchdog, ids, owner)
}

fn busy_wait(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        hint::spin_loop();
    }
}

#[test]
fn overrun_is_marked_after_the_fact() {
    let (watchdog, ids, owner) = setup();

    watchdog.run_timed(&owner, ids.client_tick, Duration::from_millis(10), || {
        busy_wait(Duration::from_millis(200));
        Ok(())
    });

    assert!(owner.is_errored());
    match owner.state.get() {
        Some(AvatarFailure::Domain(AvatarError::BudgetExceeded { category, budget })) => {
            assert_eq!(category, "ticking/scripts/client_tick");
            assert_eq!(*budget, Duration::from_millis(10));
        }
        other => panic!("expected budget exceeded, got {other:?}"),
    }
    let recorded = owner.profiling.running_average(ids.client_tick).unwrap();
    assert!(recorded >= Duration::from_millis(200), "recorded {recorded:?}");
    assert!(recorded < Duration::from_secs(2), "recorded {recorded:?}");
    assert_eq!(watchdog.live_tasks(), 0);
}

#[test]
fn killed_operation_result_is_discarded() {
    let (watchdog, ids, owner) = setup();

    let result = watchdog.run_timed_for(&owner, ids.callback, Duration::from_millis(10), || {
        thread::sleep(Duration::from_millis(100));
        Ok(42)
    });

    assert_eq!(result, None);
    assert!(owner.is_errored());
}

#[test]
fn fast_operation_keeps_result() {
    let (watchdog, ids, owner) = setup();

    let result = watchdog.run_timed_for(&owner, ids.callback, Duration::from_secs(5), || Ok(7));

    assert_eq!(result, Some(7));
    assert!(!owner.is_errored());
    assert_eq!(owner.profiling.samples(ids.callback), 1);
}

#[test]
fn operation_error_marks_owner() {
    let (watchdog, ids, owner) = setup();

    let result: Option<()> = watchdog.run_timed_for(&owner, ids.events, Duration::from_secs(5), || {
        Err(AvatarError::script("attempt to index nil"))
    });

    assert_eq!(result, None);
    assert_eq!(
        owner.state.get(),
        Some(&AvatarFailure::Domain(AvatarError::script("attempt to index nil")))
    );
    assert_eq!(watchdog.live_tasks(), 0);
}

#[test]
fn panicking_operation_still_deregisters_and_records() {
    let (watchdog, ids, owner) = setup();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        watchdog.run_timed(&owner, ids.world_tick, Duration::from_secs(5), || {
            panic!("host bug");
        });
    }));

    assert!(outcome.is_err());
    assert_eq!(watchdog.live_tasks(), 0);
    assert_eq!(owner.profiling.samples(ids.world_tick), 1);
}

#[test]
fn erased_owner_is_accepted() {
    let (watchdog, ids, owner) = setup();
    let erased: Arc<dyn Avatar> = owner.clone();

    watchdog.run_timed(&erased, ids.client_tick, Duration::from_millis(1), || {
        thread::sleep(Duration::from_millis(100));
        Ok(())
    });

    assert!(owner.is_errored());
}
