//!
//! Reentrant RwSleepLock
//!
//! A reader-writer lock whose waiters sleep on a condition variable.
//! Multiple readers may hold it at once; a writer excludes every other
//! thread.
//!
//! ## Reentrancy
//!
//! Per-thread depths are tracked in a map keyed by thread id:
//! - a thread holding the write lock may take further write or read locks
//! - a thread holding read locks may take more read locks
//! - a thread holding read locks may take the write lock once it is the
//!   only reader left (two threads doing this at once deadlock)
//!
//! ## Fairness
//!
//! While a writer is waiting, threads that hold nothing on this lock do
//! not start new reads. Reentrant reads still proceed, since the waiting
//! writer may be waiting on exactly that thread. This keeps a steady
//! stream of overlapping readers from starving a writer. There is no
//! FIFO ordering among writers or among readers.
//!

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Default)]
struct RwState {
    writer: Option<ThreadId>,
    write_depth: usize,
    reader_count: usize,
    readers: HashMap<ThreadId, usize>,
    waiting_writers: usize,
}

impl RwState {
    fn reads_held_by(&self, id: ThreadId) -> usize {
        self.readers.get(&id).copied().unwrap_or(0)
    }

    fn add_reader(&mut self, id: ThreadId) {
        *self.readers.entry(id).or_insert(0) += 1;
        self.reader_count += 1;
    }
}

#[derive(Default)]
struct RwShared {
    state: Mutex<RwState>,
    changed: Condvar,
}

impl RwShared {
    fn state(&self) -> MutexGuard<'_, RwState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, RwState>) -> MutexGuard<'a, RwState> {
        self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone, Default)]
pub struct RwSleepLock {
    shared: Arc<RwShared>,
}

impl RwSleepLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_read(&self) {
        let me = thread::current().id();
        let mut state = self.shared.state();
        loop {
            let reentrant = state.writer == Some(me) || state.reads_held_by(me) > 0;
            let free = state.writer.is_none() && state.waiting_writers == 0;
            if reentrant || free {
                state.add_reader(me);
                return;
            }
            state = self.shared.wait(state);
        }
    }

    /// Undo one `take_read`. Returns false when the caller holds no read.
    pub fn leave_read(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.shared.state();
        match state.readers.get_mut(&me) {
            Some(depth) => {
                *depth -= 1;
                if *depth == 0 {
                    state.readers.remove(&me);
                }
                state.reader_count -= 1;
            }
            None => {
                tracing::warn!("RwSleepLock::leave_read without a matching take_read");
                return false;
            }
        }
        drop(state);
        self.shared.changed.notify_all();
        true
    }

    pub fn take_write(&self) {
        let me = thread::current().id();
        let mut state = self.shared.state();
        loop {
            if state.writer == Some(me) {
                state.write_depth += 1;
                return;
            }
            let foreign_readers = state.reader_count - state.reads_held_by(me);
            if state.writer.is_none() && foreign_readers == 0 {
                state.writer = Some(me);
                state.write_depth = 1;
                return;
            }
            state.waiting_writers += 1;
            state = self.shared.wait(state);
            state.waiting_writers -= 1;
        }
    }

    /// Undo one `take_write`. Returns false when the caller is not the writer.
    pub fn leave_write(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.shared.state();
        if state.writer != Some(me) {
            tracing::warn!("RwSleepLock::leave_write by a thread that is not the writer");
            return false;
        }
        state.write_depth -= 1;
        if state.write_depth == 0 {
            state.writer = None;
        }
        drop(state);
        self.shared.changed.notify_all();
        true
    }

    pub fn read(&self) -> ReadGuard<'_> {
        self.take_read();
        ReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn write(&self) -> WriteGuard<'_> {
        self.take_write();
        WriteGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    pub fn reader_count(&self) -> usize {
        self.shared.state().reader_count
    }

    pub fn is_write_locked(&self) -> bool {
        self.shared.state().writer.is_some()
    }

    pub fn same_lock(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for RwSleepLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state();
        f.debug_struct("RwSleepLock")
            .field("readers", &state.reader_count)
            .field("write_depth", &state.write_depth)
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}

pub struct ReadGuard<'a> {
    lock: &'a RwSleepLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.leave_read();
    }
}

pub struct WriteGuard<'a> {
    lock: &'a RwSleepLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.leave_write();
    }
}
