//!
//! ThreadedTask - Parallel For
//!
//! `execute_threaded_task(count, arg, f)` calls `f(i, arg)` exactly once
//! for every `i` in `0..count`, spread over up to one pool thread per
//! processor, and returns when all of them are done.
//!
//! Workers claim index ranges from a shared cursor with one `fetch_add`
//! per range, so ranges never overlap. Ranges start at a quarter of each
//! worker's fair share and shrink once, to about half, when the cursor
//! passes 80% of `count`, so the tail of the work spreads more evenly.
//!
//! ```ignore
//! let squares: Vec<AtomicUsize> = (0..1000).map(|_| AtomicUsize::new(0)).collect();
//! execute_threaded_task(squares.len(), &squares, |i, out| {
//!     out[i].store(i * i, Ordering::Relaxed);
//! });
//! ```
//!

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use tessel_core::processor_count;

use crate::pool::ThreadPool;

/// Index ranges of one task
struct Ranges {
    count: usize,
    cursor: AtomicUsize,
    chunk: AtomicUsize,
    /// Cursor position after which ranges shrink
    tail: usize,
    shrunk: AtomicBool,
}

impl Ranges {
    fn new(count: usize, workers: usize) -> Self {
        let chunk = (count / workers.max(1) / 4).max(1);
        Self {
            count,
            cursor: AtomicUsize::new(0),
            chunk: AtomicUsize::new(chunk),
            tail: count - count / 5,
            shrunk: AtomicBool::new(false),
        }
    }

    /// Claim the next range, or None once the cursor has run past `count`
    fn claim(&self) -> Option<(usize, usize)> {
        let chunk = self.chunk.load(Ordering::SeqCst);
        let start = self.cursor.fetch_add(chunk, Ordering::SeqCst);
        if start >= self.count {
            return None;
        }
        let end = start.saturating_add(chunk).min(self.count);
        if end >= self.tail && !self.shrunk.swap(true, Ordering::SeqCst) {
            self.chunk.store(chunk / 2 + 1, Ordering::SeqCst);
        }
        Some((start, end))
    }

    fn run(&self, body: &(dyn Fn(usize) + Sync)) {
        while let Some((start, end)) = self.claim() {
            for index in start..end {
                body(index);
            }
        }
    }
}

/// Decrements the live-worker count when a worker finishes, even by panic
struct Finished(Arc<AtomicUsize>);

impl Drop for Finished {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run `f(i, arg)` for every `i` in `0..count` on the global pool
pub fn execute_threaded_task<A, F>(count: usize, arg: &A, f: F)
where
    A: Sync + ?Sized,
    F: Fn(usize, &A) + Sync,
{
    execute_threaded_task_in(ThreadPool::global(), count, arg, f);
}

/// Run `f(i, arg)` for every `i` in `0..count` on `pool`.
///
/// Blocks until every index has been processed.
pub fn execute_threaded_task_in<A, F>(pool: &ThreadPool, count: usize, arg: &A, f: F)
where
    A: Sync + ?Sized,
    F: Fn(usize, &A) + Sync,
{
    if count == 0 {
        return;
    }

    let workers = processor_count().min(count);
    let ranges = Ranges::new(count, processor_count());
    let body = |index: usize| f(index, arg);
    let work = || ranges.run(&body);
    let work: &(dyn Fn() + Sync) = &work;
    // SAFETY: every job holding this reference is counted in `alive`, and
    // this function does not return (or unwind) until `alive` is zero, so
    // the borrowed closure outlives every use of the extended reference.
    let work: &'static (dyn Fn() + Sync) = unsafe { std::mem::transmute(work) };

    let alive = Arc::new(AtomicUsize::new(workers));
    for _ in 0..workers {
        let finished = Finished(Arc::clone(&alive));
        pool.run_thread(move || {
            let _finished = finished;
            work();
        });
    }

    while alive.load(Ordering::SeqCst) > 0 {
        thread::yield_now();
    }

    tracing::trace!(count, workers, "threaded task complete");
}
