//! Access wrapper deciding whether an avatar operation needs serialization.
//!
//! The strategy is fixed when the handle is built from the avatar's
//! declared [`ThreadSafety`]: a thread-safe avatar gets a
//! [`ConcurrentHandle`] (no lock), anything else a [`SerializedHandle`]
//! whose lock is shared by every clone.
//!
//! # Deadlock discipline
//!
//! Locks are never taken in a fixed global order, so call sites must uphold
//! one rule: a thread-safe avatar must never, during its own operation,
//! enter a thread-unsafe avatar. Under that rule two avatar locks are never
//! held in conflicting order. Nothing here enforces it.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use marionette_types::{Avatar, ThreadSafety};

/// Lock-free access for an avatar that declared itself thread-safe.
pub struct ConcurrentHandle<A: ?Sized> {
    avatar: Arc<A>,
}

impl<A: Avatar + ?Sized> ConcurrentHandle<A> {
    pub fn with<R>(&self, operation: impl FnOnce(&Arc<A>) -> R) -> R {
        operation(&self.avatar)
    }
}

/// Fully serialized access through the avatar's own lock.
pub struct SerializedHandle<A: ?Sized> {
    avatar: Arc<A>,
    lock: Arc<Mutex<()>>,
}

impl<A: Avatar + ?Sized> SerializedHandle<A> {
    /// Blocks while another thread is inside this avatar.
    pub fn with<R>(&self, operation: impl FnOnce(&Arc<A>) -> R) -> R {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        operation(&self.avatar)
    }
}

/// Common interface over both access strategies.
///
/// Cloning is cheap and every clone shares the same lock.
pub enum AvatarHandle<A: ?Sized> {
    Concurrent(ConcurrentHandle<A>),
    Serialized(SerializedHandle<A>),
}

impl<A: Avatar> AvatarHandle<A> {
    pub fn new(avatar: A) -> Self {
        Self::from_arc(Arc::new(avatar))
    }

    /// Forget the concrete avatar type. The lock is shared with `self`.
    #[must_use]
    pub fn erase(&self) -> AvatarHandle<dyn Avatar> {
        match self {
            AvatarHandle::Concurrent(handle) => {
                let avatar: Arc<dyn Avatar> = handle.avatar.clone();
                AvatarHandle::Concurrent(ConcurrentHandle { avatar })
            }
            AvatarHandle::Serialized(handle) => {
                let avatar: Arc<dyn Avatar> = handle.avatar.clone();
                AvatarHandle::Serialized(SerializedHandle {
                    avatar,
                    lock: Arc::clone(&handle.lock),
                })
            }
        }
    }
}

impl<A: Avatar + ?Sized> AvatarHandle<A> {
    /// Choose the access strategy from the avatar's declared thread safety.
    pub fn from_arc(avatar: Arc<A>) -> Self {
        match avatar.thread_safety() {
            ThreadSafety::Safe => AvatarHandle::Concurrent(ConcurrentHandle { avatar }),
            ThreadSafety::Unsafe => AvatarHandle::Serialized(SerializedHandle {
                avatar,
                lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Run `operation` with access to the avatar, holding its lock if it is
    /// thread-unsafe.
    pub fn with<R>(&self, operation: impl FnOnce(&Arc<A>) -> R) -> R {
        match self {
            AvatarHandle::Concurrent(handle) => handle.with(operation),
            AvatarHandle::Serialized(handle) => handle.with(operation),
        }
    }

    /// Direct access without the lock, for operations that are safe on any
    /// avatar (error flag, readiness, teardown).
    #[must_use]
    pub fn avatar(&self) -> &Arc<A> {
        match self {
            AvatarHandle::Concurrent(handle) => &handle.avatar,
            AvatarHandle::Serialized(handle) => &handle.avatar,
        }
    }

    #[must_use]
    pub fn is_serialized(&self) -> bool {
        matches!(self, AvatarHandle::Serialized(_))
    }

    /// Whether both handles refer to the same avatar instance.
    #[must_use]
    pub fn same_avatar<B: Avatar + ?Sized>(&self, other: &AvatarHandle<B>) -> bool {
        Arc::as_ptr(self.avatar()).cast::<()>() == Arc::as_ptr(other.avatar()).cast::<()>()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakAvatarHandle<A> {
        match self {
            AvatarHandle::Concurrent(handle) => WeakAvatarHandle {
                avatar: Arc::downgrade(&handle.avatar),
                lock: None,
            },
            AvatarHandle::Serialized(handle) => WeakAvatarHandle {
                avatar: Arc::downgrade(&handle.avatar),
                lock: Some(Arc::clone(&handle.lock)),
            },
        }
    }
}

impl<A: ?Sized> Clone for AvatarHandle<A> {
    fn clone(&self) -> Self {
        match self {
            AvatarHandle::Concurrent(handle) => AvatarHandle::Concurrent(ConcurrentHandle {
                avatar: Arc::clone(&handle.avatar),
            }),
            AvatarHandle::Serialized(handle) => AvatarHandle::Serialized(SerializedHandle {
                avatar: Arc::clone(&handle.avatar),
                lock: Arc::clone(&handle.lock),
            }),
        }
    }
}

impl<A: ?Sized> fmt::Debug for AvatarHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvatarHandle::Concurrent(_) => f.write_str("AvatarHandle::Concurrent"),
            AvatarHandle::Serialized(_) => f.write_str("AvatarHandle::Serialized"),
        }
    }
}

/// Non-owning handle, used by things an avatar owns that need to point
/// back at it (callbacks, lent views) without keeping it alive.
pub struct WeakAvatarHandle<A: ?Sized> {
    avatar: Weak<A>,
    lock: Option<Arc<Mutex<()>>>,
}

impl<A: ?Sized> WeakAvatarHandle<A> {
    #[must_use]
    pub fn upgrade(&self) -> Option<AvatarHandle<A>> {
        let avatar = self.avatar.upgrade()?;
        Some(match &self.lock {
            None => AvatarHandle::Concurrent(ConcurrentHandle { avatar }),
            Some(lock) => AvatarHandle::Serialized(SerializedHandle {
                avatar,
                lock: Arc::clone(lock),
            }),
        })
    }
}

impl<A: ?Sized> Clone for WeakAvatarHandle<A> {
    fn clone(&self) -> Self {
        Self {
            avatar: Weak::clone(&self.avatar),
            lock: self.lock.clone(),
        }
    }
}

impl<A: ?Sized> fmt::Debug for WeakAvatarHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakAvatarHandle")
            .field("serialized", &self.lock.is_some())
            .field("alive", &(self.avatar.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_types::AvatarFailure;
    use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Plain {
        safety: ThreadSafety,
        destroyed: AtomicBool,
    }

    impl Plain {
        fn new(safety: ThreadSafety) -> Self {
            Self {
                safety,
                destroyed: AtomicBool::new(false),
            }
        }
    }

    impl Avatar for Plain {
        fn thread_safety(&self) -> ThreadSafety {
            self.safety
        }
        fn is_errored(&self) -> bool {
            false
        }
        fn error(&self, _failure: AvatarFailure) {}
        fn destroy(&self) {
            self.destroyed.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn strategy_follows_declared_safety() {
        assert!(!AvatarHandle::new(Plain::new(ThreadSafety::Safe)).is_serialized());
        assert!(AvatarHandle::new(Plain::new(ThreadSafety::Unsafe)).is_serialized());
    }

    #[test]
    fn unsafe_avatar_is_mutually_exclusive() {
        let handle = AvatarHandle::new(Plain::new(ThreadSafety::Unsafe));
        let inside = Arc::new(AtomicI32::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let handle = handle.clone();
                let inside = Arc::clone(&inside);
                let overlapped = Arc::clone(&overlapped);
                thread::spawn(move || {
                    for _ in 0..5 {
                        handle.with(|_| {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlapped.store(true, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_millis(5));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn erased_handle_shares_lock_and_identity() {
        let handle = AvatarHandle::new(Plain::new(ThreadSafety::Unsafe));
        let erased = handle.erase();
        assert!(erased.is_serialized());
        assert!(erased.same_avatar(&handle));

        let (AvatarHandle::Serialized(a), AvatarHandle::Serialized(b)) = (&handle, &erased) else {
            panic!("expected serialized handles");
        };
        assert!(Arc::ptr_eq(&a.lock, &b.lock));
    }

    #[test]
    fn weak_handle_does_not_keep_avatar_alive() {
        let handle = AvatarHandle::new(Plain::new(ThreadSafety::Safe));
        let weak = handle.downgrade();
        assert!(weak.upgrade().is_some());
        drop(handle);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn distinct_avatars_are_not_the_same() {
        let a = AvatarHandle::new(Plain::new(ThreadSafety::Safe));
        let b = AvatarHandle::new(Plain::new(ThreadSafety::Safe));
        assert!(!a.same_avatar(&b));
        a.avatar().destroy();
        assert!(a.avatar().destroyed.load(Ordering::SeqCst));
    }
}
