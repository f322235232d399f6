//!
//! SpinLock
//!
//! A busy-waiting lock for very short critical sections. The handle is a
//! cheap clone of an `Arc`'d state block, so every clone guards the same
//! data.
//!
//! Acquisition spins on a compare-and-swap of the `taken` flag. A thread
//! that fails the swap records a collision; the holder sees it on release
//! and yields once so the contender gets a chance to run.
//!
//! Whether a spinning thread gives up its time slice is a process-wide
//! policy (`set_yield_policy`). Under `YieldPolicy::Auto` a single-core
//! machine yields on every failed attempt, because the holder cannot make
//! progress while we spin; a multi-core machine spins with a CPU hint and
//! only yields every `SPINS_BEFORE_YIELD` attempts.
//!
//! Not reentrant: taking the lock twice from one thread deadlocks.
//!

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;

use tessel_core::YieldPolicy;
use tessel_core::system::is_multi_core;

const SPINS_BEFORE_YIELD: u32 = 64;

static YIELD_POLICY: AtomicU8 = AtomicU8::new(0);

pub fn set_yield_policy(policy: YieldPolicy) {
    let raw = match policy {
        YieldPolicy::Auto => 0,
        YieldPolicy::Always => 1,
        YieldPolicy::Never => 2,
    };
    YIELD_POLICY.store(raw, Ordering::Relaxed);
}

pub fn yield_policy() -> YieldPolicy {
    match YIELD_POLICY.load(Ordering::Relaxed) {
        1 => YieldPolicy::Always,
        2 => YieldPolicy::Never,
        _ => YieldPolicy::Auto,
    }
}

/// One failed acquisition attempt
fn backoff(spins: &mut u32) {
    *spins = spins.wrapping_add(1);
    match yield_policy() {
        YieldPolicy::Always => thread::yield_now(),
        YieldPolicy::Never => std::hint::spin_loop(),
        YieldPolicy::Auto => {
            if !is_multi_core() || *spins % SPINS_BEFORE_YIELD == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

struct SpinShared<T> {
    taken: AtomicBool,
    collision: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinShared<T> {}

impl<T> SpinShared<T> {
    fn acquire(&self) {
        let mut spins = 0;
        while !self.try_acquire() {
            self.collision.store(true, Ordering::Relaxed);
            backoff(&mut spins);
        }
    }

    fn try_acquire(&self) -> bool {
        self.taken
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self) {
        let collided = self.collision.swap(false, Ordering::Relaxed);
        self.taken.store(false, Ordering::Release);
        if collided && yield_policy() != YieldPolicy::Never {
            thread::yield_now();
        }
    }
}

pub struct SpinLock<T = ()> {
    shared: Arc<SpinShared<T>>,
}

impl<T> SpinLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(SpinShared {
                taken: AtomicBool::new(false),
                collision: AtomicBool::new(false),
                data: UnsafeCell::new(value),
            }),
        }
    }

    pub fn lock(&self) -> SpinGuard<'_, T> {
        self.shared.acquire();
        SpinGuard { shared: &self.shared }
    }

    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        if self.shared.try_acquire() {
            Some(SpinGuard { shared: &self.shared })
        } else {
            None
        }
    }

    pub fn is_taken(&self) -> bool {
        self.shared.taken.load(Ordering::Relaxed)
    }

    /// True when both handles share one lock
    pub fn same_lock(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl SpinLock<()> {
    /// Spin until the lock is held by the caller
    pub fn take(&self) {
        self.shared.acquire();
    }

    pub fn try_take(&self) -> bool {
        self.shared.try_acquire()
    }

    pub fn leave(&self) {
        if !self.is_taken() {
            tracing::warn!("SpinLock::leave called on a lock that is not taken");
            return;
        }
        self.shared.release();
    }
}

impl<T> Clone for SpinLock<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("taken", &self.is_taken())
            .finish()
    }
}

pub struct SpinGuard<'a, T> {
    shared: &'a SpinShared<T>,
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.shared.data.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.shared.data.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_spin_basic() {
        let lock = SpinLock::new(5);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_taken());
            assert!(lock.try_lock().is_none());
        }
        assert!(!lock.is_taken());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn test_clone_shares_lock() {
        let a = SpinLock::new(Vec::<u8>::new());
        let b = a.clone();
        assert!(a.same_lock(&b));
        a.lock().push(1);
        b.lock().push(2);
        assert_eq!(*a.lock(), vec![1, 2]);
        assert!(!a.same_lock(&SpinLock::default()));
    }

    #[test]
    fn test_raw_take_leave() {
        let lock = SpinLock::default();
        lock.take();
        assert!(!lock.try_take());
        lock.leave();
        assert!(lock.try_take());
        lock.leave();
        // leaving an untaken lock is reported, not fatal
        lock.leave();
        assert!(!lock.is_taken());
    }

    #[test]
    fn test_spin_mutual_exclusion() {
        let lock = SpinLock::default();
        let value = Arc::new(AtomicUsize::new(0));
        let violations = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..20).map(|_| {
            let lock = lock.clone();
            let value = Arc::clone(&value);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                for _ in 0..500 {
                    lock.take();
                    let seen = value.load(Ordering::SeqCst);
                    value.store(seen + 1, Ordering::SeqCst);
                    std::hint::spin_loop();
                    if value.load(Ordering::SeqCst) != seen + 1 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    lock.leave();
                }
            })
        }).collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(value.load(Ordering::SeqCst), 10_000);
    }

    #[test]
    fn test_guarded_counter_under_policies() {
        for policy in [YieldPolicy::Always, YieldPolicy::Never, YieldPolicy::Auto] {
            set_yield_policy(policy);
            let lock = SpinLock::new(0usize);
            let handles: Vec<_> = (0..8).map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            }).collect();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(*lock.lock(), 8000);
        }
        set_yield_policy(YieldPolicy::Auto);
    }
}
