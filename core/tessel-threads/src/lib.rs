//!
//! tessel-threads - Thread Pool and Parallel Tasks
//!
//! - `ThreadPool` - a bounded gate over reusable OS threads. Callers block
//!   while every thread is busy and the pool is at its limit.
//! - `execute_threaded_task` - parallel for over `0..count` that blocks
//!   until every index has been visited exactly once.
//!
//! `ThreadPool::global()` is shared by the whole process; size it with
//! `configure_global_pool` before first use.
//!

pub mod pool;
pub mod task;

pub use pool::{POOL_HOOK, ThreadPool, configure_global_pool, register_pool_hook};
pub use task::{execute_threaded_task, execute_threaded_task_in};
