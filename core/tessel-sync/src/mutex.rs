//!
//! Reentrant MutexLock
//!
//! A sleeping lock that the owning thread may take again without blocking
//! itself. Ownership is a (thread id, depth) pair guarded by an OS mutex;
//! other threads sleep on a condition variable until depth drops to zero.
//!
//! Like every tessel lock, the handle is a clone of an `Arc`'d state block.
//! The guard only hands out `&T`: a second guard taken by the same thread
//! would alias a `&mut T`. Use interior mutability (`Cell`, `RefCell`) for
//! data that must change under the lock.
//!
//! ```ignore
//! let lock = MutexLock::new(RefCell::new(Vec::new()));
//! let outer = lock.lock();
//! let inner = lock.lock(); // same thread, no deadlock
//! inner.borrow_mut().push(1);
//! ```
//!

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard as StdGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Default)]
struct Owner {
    thread: Option<ThreadId>,
    depth: usize,
}

struct MutexShared<T> {
    owner: Mutex<Owner>,
    released: Condvar,
    data: T,
}

unsafe impl<T: Send> Sync for MutexShared<T> {}

impl<T> MutexShared<T> {
    fn owner(&self) -> StdGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self) {
        let me = thread::current().id();
        let mut owner = self.owner();
        loop {
            match owner.thread {
                None => {
                    owner.thread = Some(me);
                    owner.depth = 1;
                    return;
                }
                Some(id) if id == me => {
                    owner.depth += 1;
                    return;
                }
                Some(_) => {
                    owner = self
                        .released
                        .wait(owner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let me = thread::current().id();
        let mut owner = self.owner();
        match owner.thread {
            None => {
                owner.thread = Some(me);
                owner.depth = 1;
                true
            }
            Some(id) if id == me => {
                owner.depth += 1;
                true
            }
            Some(_) => false,
        }
    }

    fn release(&self) -> bool {
        let me = thread::current().id();
        let mut owner = self.owner();
        if owner.thread != Some(me) {
            tracing::warn!("MutexLock released by a thread that does not own it");
            return false;
        }
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            drop(owner);
            self.released.notify_one();
        }
        true
    }
}

pub struct MutexLock<T = ()> {
    shared: Arc<MutexShared<T>>,
}

impl<T> MutexLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            shared: Arc::new(MutexShared {
                owner: Mutex::new(Owner::default()),
                released: Condvar::new(),
                data: value,
            }),
        }
    }

    /// Block until the calling thread owns the lock
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.shared.acquire();
        MutexGuard {
            shared: &self.shared,
            _not_send: PhantomData,
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.shared.try_acquire() {
            Some(MutexGuard {
                shared: &self.shared,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        self.shared.owner().thread == Some(thread::current().id())
    }

    /// Recursion depth of the current owner, 0 when free
    pub fn depth(&self) -> usize {
        self.shared.owner().depth
    }

    pub fn same_lock(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl MutexLock<()> {
    pub fn take(&self) {
        self.shared.acquire();
    }

    pub fn try_take(&self) -> bool {
        self.shared.try_acquire()
    }

    /// Undo one `take`. Returns false when the caller does not own the lock.
    pub fn leave(&self) -> bool {
        self.shared.release()
    }
}

impl<T> Clone for MutexLock<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Default> Default for MutexLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for MutexLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexLock")
            .field("depth", &self.depth())
            .finish()
    }
}

/// Held ownership of a `MutexLock`; released on drop. Not `Send`.
pub struct MutexGuard<'a, T> {
    shared: &'a MutexShared<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.shared.data
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.shared.release();
    }
}
