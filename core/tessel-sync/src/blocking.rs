//!
//! BlockingObject - Manual-reset Signal
//!
//! `set()` raises the signal; `wait_until_clear` blocks while it is raised.
//! `clear()` lowers it, wakes every waiter, and records a clear credit.
//! A waiter that checks the object after a `clear()` has already been
//! followed by another `set()` still sees the credit and returns, so a
//! wakeup can never be lost between the clear and the waiter's check.
//!
//! A successful wait consumes all credits. Callers must treat a `true`
//! return as "something changed, re-check your condition", not as proof
//! that their condition holds.
//!
//! With `set_on_return` the object is raised again before the wait
//! returns, under the same lock, which makes "wait for the go, then claim
//! it" race-free.
//!
//! One logical waiter per object is supported. Any number of threads may
//! set and clear.
//!

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct BlockState {
    is_set: bool,
    clear_count: usize,
}

#[derive(Default)]
struct BlockShared {
    state: Mutex<BlockState>,
    cleared: Condvar,
}

impl BlockShared {
    fn state(&self) -> MutexGuard<'_, BlockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct BlockingObject {
    shared: Arc<BlockShared>,
}

impl BlockingObject {
    /// A new object in the clear state
    pub fn new() -> Self {
        Self::default()
    }

    /// A new object in the set state
    pub fn new_set() -> Self {
        let object = Self::default();
        object.set();
        object
    }

    pub fn set(&self) {
        self.shared.state().is_set = true;
    }

    pub fn clear(&self) {
        let mut state = self.shared.state();
        state.is_set = false;
        state.clear_count = state.clear_count.wrapping_add(1);
        drop(state);
        self.shared.cleared.notify_all();
    }

    pub fn is_set(&self) -> bool {
        self.shared.state().is_set
    }

    /// Block until the object is clear or a clear credit is pending.
    ///
    /// Returns false only when `timeout` elapses first. `None` waits
    /// forever.
    pub fn wait_until_clear(&self, set_on_return: bool, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state();
        loop {
            if !state.is_set || state.clear_count > 0 {
                state.clear_count = 0;
                if set_on_return {
                    state.is_set = true;
                }
                return true;
            }

            state = match deadline {
                None => self
                    .shared
                    .cleared
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.shared
                        .cleared
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    pub fn wait_until_clear_ms(&self, set_on_return: bool, timeout_ms: u64) -> bool {
        self.wait_until_clear(set_on_return, Some(Duration::from_millis(timeout_ms)))
    }

    pub fn same_object(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for BlockingObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state();
        f.debug_struct("BlockingObject")
            .field("is_set", &state.is_set)
            .field("clear_count", &state.clear_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_clear_object_returns_immediately() {
        let object = BlockingObject::new();
        assert!(!object.is_set());
        assert!(object.wait_until_clear(false, Some(Duration::from_millis(1))));
        assert!(!object.is_set());

        assert!(object.wait_until_clear(true, None));
        assert!(object.is_set());
    }

    #[test]
    fn test_wait_blocks_until_clear() {
        let object = BlockingObject::new_set();
        let returned = Arc::new(AtomicBool::new(false));

        let waiter = {
            let object = object.clone();
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                let result = object.wait_until_clear(false, None);
                returned.store(true, Ordering::SeqCst);
                result
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!returned.load(Ordering::SeqCst));

        object.clear();
        assert!(waiter.join().unwrap());
        assert!(returned.load(Ordering::SeqCst));
    }

    #[test]
    fn test_timeout_on_set_object() {
        let object = BlockingObject::new_set();
        let start = Instant::now();
        assert!(!object.wait_until_clear_ms(false, 100));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[test]
    fn test_clear_credit_survives_reset() {
        let object = BlockingObject::new_set();
        object.clear();
        object.set();
        // the clear happened before we looked; the credit still wakes us
        assert!(object.wait_until_clear(true, Some(Duration::from_millis(10))));
        // credit consumed, object set again
        assert!(!object.wait_until_clear(false, Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_set_on_return_claims() {
        let object = BlockingObject::new_set();
        let claimer = {
            let object = object.clone();
            thread::spawn(move || object.wait_until_clear(true, Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        object.clear();
        assert!(claimer.join().unwrap());
        assert!(object.is_set());
    }
}
