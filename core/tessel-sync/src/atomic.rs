///
/// Word-sized Atomics
///
/// Two types are provided:
/// - `AtomicWord` - machine-word signed integer
/// - `AtomicPointer<T>` - raw pointer
///
/// All operations use SeqCst ordering for safety and simplicity.
/// `increment`, `decrement` and `add` return the value *after* the
/// operation, which is what reference counting and cursor code wants.
///

use std::fmt;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

#[derive(Default)]
pub struct AtomicWord {
    inner: AtomicIsize,
}

impl AtomicWord {
    pub const fn new(value: isize) -> Self {
        Self {
            inner: AtomicIsize::new(value),
        }
    }

    pub fn load(&self) -> isize {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn store(&self, value: isize) {
        self.inner.store(value, Ordering::SeqCst)
    }

    pub fn increment(&self) -> isize {
        self.inner.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    pub fn decrement(&self) -> isize {
        self.inner.fetch_sub(1, Ordering::SeqCst).wrapping_sub(1)
    }

    pub fn add(&self, value: isize) -> isize {
        self.inner.fetch_add(value, Ordering::SeqCst).wrapping_add(value)
    }

    /// Returns the previous value
    pub fn swap(&self, value: isize) -> isize {
        self.inner.swap(value, Ordering::SeqCst)
    }

    /// Store `new` if the current value is `expected`. Returns true on success.
    pub fn compare_and_swap(&self, expected: isize, new: isize) -> bool {
        self.inner
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl fmt::Debug for AtomicWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicWord").field(&self.load()).finish()
    }
}

pub struct AtomicPointer<T> {
    inner: AtomicPtr<T>,
}

impl<T> AtomicPointer<T> {
    pub const fn new(ptr: *mut T) -> Self {
        Self {
            inner: AtomicPtr::new(ptr),
        }
    }

    pub const fn null() -> Self {
        Self::new(std::ptr::null_mut())
    }

    pub fn load(&self) -> *mut T {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn store(&self, ptr: *mut T) {
        self.inner.store(ptr, Ordering::SeqCst)
    }

    pub fn swap(&self, ptr: *mut T) -> *mut T {
        self.inner.swap(ptr, Ordering::SeqCst)
    }

    pub fn compare_and_swap(&self, expected: *mut T, new: *mut T) -> bool {
        self.inner
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl<T> Default for AtomicPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for AtomicPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicPointer").field(&self.load()).finish()
    }
}
