//!
//! tessel-sync - Synchronization Primitives
//!
//! Building blocks for everything above it in tessel:
//!
//! - `AtomicWord` / `AtomicPointer` - SeqCst word-sized atomics
//! - `SpinLock` - busy-wait lock with collision-triggered yield
//! - `MutexLock` - reentrant sleeping mutex
//! - `RwSleepLock` - reentrant reader/writer lock
//! - `BlockingObject` - manual-reset signal with clear credits
//! - `Thread` - OS thread with a cooperative end flag
//!
//! Every lock handle is `Clone`; clones share one `Arc`'d state block and
//! the state is freed when the last clone is dropped.
//!

pub mod atomic;
pub mod blocking;
pub mod errors;
pub mod mutex;
pub mod rwlock;
pub mod spin;
pub mod thread;

pub use atomic::{AtomicPointer, AtomicWord};
pub use blocking::BlockingObject;
pub use errors::ThreadError;
pub use mutex::{MutexGuard, MutexLock};
pub use rwlock::{ReadGuard, RwSleepLock, WriteGuard};
pub use spin::{SpinGuard, SpinLock, set_yield_policy, yield_policy};
pub use thread::{Thread, ThreadContext};
