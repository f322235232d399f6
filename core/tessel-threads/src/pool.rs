//!
//! ThreadPool - Bounded Concurrency Gate
//!
//! A set of reusable OS threads. `run_thread` hands a function to an idle
//! thread, grows the pool by one thread when none is idle and the limit
//! allows it, or blocks the caller until a busy thread comes back. There
//! is no queue: at most `thread_limit()` functions run at once, and the
//! extra callers wait.
//!
//! Each pool thread moves through `idle -> assigned -> running -> idle`.
//! It sleeps on its own `BlockingObject` while idle; assigning a job
//! stores the function and clears that object.
//!
//! ## Failure
//!
//! A failed OS thread spawn is reported to the diagnostic sink and lowers
//! the limit by one. When no slot is usable at all, `run_thread` runs the
//! function on the caller's thread and returns false. A panic inside a
//! pool function is caught and reported; the thread goes back to idle.
//!
//! ## Shutdown
//!
//! Dropping the pool tells every thread to end, wakes it, waits until every
//! thread is idle again and then joins them all.
//!

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use tessel_core::PoolConfig;
use tessel_core::lifecycle::{self, CORE_PRIORITY, Hook};
use tessel_debug::{panic_message, report_error};
use tessel_sync::{BlockingObject, MutexLock, SpinLock, Thread, ThreadContext, ThreadError};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) type ThreadBody = Box<dyn FnOnce(&ThreadContext) + Send + 'static>;

/// Creates the OS thread behind one pool slot
pub(crate) type Spawner = fn(String, ThreadBody) -> Result<Thread, ThreadError>;

const RETURN_POLL: Duration = Duration::from_millis(100);

fn spawn_os_thread(name: String, body: ThreadBody) -> Result<Thread, ThreadError> {
    Thread::spawn(name, body)
}

struct Worker {
    index: usize,
    job: SpinLock<Option<Job>>,
    /// Set while idle; cleared to wake the thread
    wake: BlockingObject,
    ending: AtomicBool,
}

impl Worker {
    fn new(index: usize) -> Self {
        Self {
            index,
            job: SpinLock::new(None),
            wake: BlockingObject::new_set(),
            ending: AtomicBool::new(false),
        }
    }

    fn assign(&self, job: Job) {
        *self.job.lock() = Some(job);
        self.wake.clear();
    }
}

#[derive(Default)]
struct Lists {
    all: Vec<Arc<Worker>>,
    available: Vec<Arc<Worker>>,
    threads: Vec<Thread>,
    /// Slots reserved by spawns in progress
    spawning: usize,
    spawned: usize,
}

struct PoolShared {
    lists: SpinLock<Lists>,
    /// Cleared whenever a thread becomes available or a slot is given up
    thread_return: BlockingObject,
    limit: AtomicUsize,
}

impl PoolShared {
    fn give_back(&self, worker: &Arc<Worker>) {
        self.lists.lock().available.push(Arc::clone(worker));
        self.thread_return.clear();
    }
}

enum Slot {
    Ready(Arc<Worker>),
    Full,
    Unusable,
}

pub struct ThreadPool {
    shared: Arc<PoolShared>,
    /// Serializes callers waiting at the limit
    waiting: MutexLock,
    spawner: Spawner,
}

impl ThreadPool {
    /// A pool that starts `initial` threads and never holds more than `max`.
    ///
    /// `max` is raised to `initial` when smaller. A limit of zero makes every
    /// `run_thread` run inline.
    pub fn new(initial: usize, max: usize) -> Self {
        Self::with_spawner(initial, max, spawn_os_thread)
    }

    pub(crate) fn with_spawner(initial: usize, max: usize, spawner: Spawner) -> Self {
        let pool = Self {
            shared: Arc::new(PoolShared {
                lists: SpinLock::new(Lists::default()),
                thread_return: BlockingObject::new(),
                limit: AtomicUsize::new(max.max(initial)),
            }),
            waiting: MutexLock::default(),
            spawner,
        };
        for _ in 0..initial {
            if let Some(worker) = pool.grow() {
                pool.shared.give_back(&worker);
            }
        }
        pool
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.initial_threads, config.effective_max_threads())
    }

    /// The process-wide pool, created on first use
    pub fn global() -> &'static ThreadPool {
        GLOBAL_POOL.get_or_init(|| {
            let config = GLOBAL_CONFIG
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .unwrap_or_default();
            tracing::debug!(
                initial = config.initial_threads,
                max = config.effective_max_threads(),
                "creating global thread pool"
            );
            ThreadPool::from_config(&config)
        })
    }

    /// Run `f` on a pool thread, blocking while every slot is busy.
    ///
    /// Returns false when the pool has no usable slot; `f` has then already
    /// run on the calling thread.
    pub fn run_thread<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(f);
        let worker = match self.acquire() {
            Slot::Ready(worker) => worker,
            Slot::Full => match self.wait_for_slot() {
                Some(worker) => worker,
                None => return run_inline(job),
            },
            Slot::Unusable => return run_inline(job),
        };
        worker.assign(job);
        true
    }

    /// Maximum number of threads, lowered by every failed spawn
    pub fn thread_limit(&self) -> usize {
        self.shared.limit.load(Ordering::SeqCst)
    }

    pub fn thread_count(&self) -> usize {
        self.shared.lists.lock().all.len()
    }

    pub fn available_count(&self) -> usize {
        self.shared.lists.lock().available.len()
    }

    fn acquire(&self) -> Slot {
        if let Some(worker) = self.shared.lists.lock().available.pop() {
            return Slot::Ready(worker);
        }
        if self.thread_limit() == 0 {
            return Slot::Unusable;
        }
        match self.grow() {
            Some(worker) => Slot::Ready(worker),
            None if self.thread_limit() == 0 => Slot::Unusable,
            None => Slot::Full,
        }
    }

    fn wait_for_slot(&self) -> Option<Arc<Worker>> {
        let _waiting = self.waiting.lock();
        loop {
            // raise before looking so a return after the check still wakes us
            self.shared.thread_return.set();
            match self.acquire() {
                Slot::Ready(worker) => return Some(worker),
                Slot::Unusable => return None,
                Slot::Full => {}
            }
            self.shared.thread_return.wait_until_clear(false, None);
        }
    }

    /// Add one thread if under the limit. The new worker is not listed as
    /// available; the caller either assigns it or gives it back.
    fn grow(&self) -> Option<Arc<Worker>> {
        let index = {
            let mut lists = self.shared.lists.lock();
            if lists.all.len() + lists.spawning >= self.thread_limit() {
                return None;
            }
            lists.spawning += 1;
            lists.spawned += 1;
            lists.spawned
        };

        let worker = Arc::new(Worker::new(index));
        let body: ThreadBody = {
            let shared = Arc::clone(&self.shared);
            let worker = Arc::clone(&worker);
            Box::new(move |ctx: &ThreadContext| worker_loop(shared, worker, ctx))
        };

        match (self.spawner)(format!("tessel-pool-{index}"), body) {
            Ok(thread) => {
                let total = {
                    let mut lists = self.shared.lists.lock();
                    lists.spawning -= 1;
                    lists.all.push(Arc::clone(&worker));
                    lists.threads.push(thread);
                    lists.all.len()
                };
                tracing::debug!(thread = index, total, "thread pool grew");
                Some(worker)
            }
            Err(err) => {
                {
                    let mut lists = self.shared.lists.lock();
                    lists.spawning -= 1;
                    let _ = self.shared.limit.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |limit| {
                        Some(limit.saturating_sub(1))
                    });
                }
                tracing::warn!(error = %err, "thread pool lost a slot");
                report_error(format_args!("thread pool: {err}; continuing with one fewer thread"));
                // waiters must re-check against the lowered limit
                self.shared.thread_return.clear();
                None
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let workers = self.shared.lists.lock().all.clone();
        for worker in &workers {
            worker.ending.store(true, Ordering::SeqCst);
            worker.wake.clear();
        }

        loop {
            self.shared.thread_return.set();
            {
                let lists = self.shared.lists.lock();
                if lists.available.len() == lists.all.len() {
                    break;
                }
            }
            self.shared.thread_return.wait_until_clear(false, Some(RETURN_POLL));
        }

        let threads = std::mem::take(&mut self.shared.lists.lock().threads);
        for thread in threads {
            thread.join();
        }
        tracing::debug!(threads = workers.len(), "thread pool shut down");
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("limit", &self.thread_limit())
            .field("threads", &self.thread_count())
            .field("available", &self.available_count())
            .finish()
    }
}

fn worker_loop(shared: Arc<PoolShared>, worker: Arc<Worker>, ctx: &ThreadContext) {
    loop {
        worker.wake.wait_until_clear(true, None);
        // an assigned function always runs, even when the end request
        // arrived with it
        let job = worker.job.lock().take();
        if let Some(job) = job {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                report_error(format_args!(
                    "thread pool: function on thread {} panicked: {}",
                    worker.index,
                    panic_message(payload.as_ref())
                ));
            }
            shared.give_back(&worker);
        }
        if worker.ending.load(Ordering::SeqCst) || ctx.is_ending() {
            break;
        }
    }
}

fn run_inline(job: Job) -> bool {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        report_error(format_args!(
            "thread pool: inline function panicked: {}",
            panic_message(payload.as_ref())
        ));
    }
    false
}

pub const POOL_HOOK: &str = "tessel.threads.pool";

/// Create the global pool at init, after the diagnostic sink is up
pub fn register_pool_hook() {
    lifecycle::register(Hook::new(POOL_HOOK, CORE_PRIORITY + 1).on_init(|| {
        ThreadPool::global();
    }));
}

static GLOBAL_POOL: OnceLock<ThreadPool> = OnceLock::new();
static GLOBAL_CONFIG: Mutex<Option<PoolConfig>> = Mutex::new(None);

/// Size the global pool. Returns false once the pool already exists.
pub fn configure_global_pool(config: &PoolConfig) -> bool {
    if GLOBAL_POOL.get().is_some() {
        return false;
    }
    *GLOBAL_CONFIG.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while !done() {
            if start.elapsed() > deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn test_initial_threads_are_idle() {
        let pool = ThreadPool::new(2, 4);
        assert_eq!(pool.thread_count(), 2);
        assert_eq!(pool.available_count(), 2);
        assert_eq!(pool.thread_limit(), 4);
    }

    #[test]
    fn test_threads_are_reused() {
        let pool = ThreadPool::new(0, 4);
        let done = Arc::new(AtomicUsize::new(0));
        for round in 1..=5 {
            let counter = Arc::clone(&done);
            assert!(pool.run_thread(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) >= round
                && pool.available_count() == pool.thread_count()));
        }
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_growth_is_logged_outside_lists_lock() {
        let pool = ThreadPool::new(0, 2);
        let shared = Arc::clone(&pool.shared);
        let logged = Arc::new(AtomicUsize::new(0));
        let under_lock = Arc::new(AtomicBool::new(false));
        let writer = {
            let logged = Arc::clone(&logged);
            let under_lock = Arc::clone(&under_lock);
            move || {
                logged.fetch_add(1, Ordering::SeqCst);
                if shared.lists.is_taken() {
                    under_lock.store(true, Ordering::SeqCst);
                }
                std::io::sink()
            }
        };
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(writer)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert!(pool.run_thread(|| {}));
        });
        assert!(logged.load(Ordering::SeqCst) > 0);
        assert!(!under_lock.load(Ordering::SeqCst));
    }

    #[test]
    fn test_limit_blocks_extra_caller() {
        let pool = Arc::new(ThreadPool::new(0, 3));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(AtomicBool::new(false));

        let job = {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let release = Arc::clone(&release);
            move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                running.fetch_sub(1, Ordering::SeqCst);
            }
        };

        for _ in 0..3 {
            assert!(pool.run_thread(job.clone()));
        }
        assert!(wait_until(Duration::from_secs(5), || running.load(Ordering::SeqCst) == 3));

        let fourth_returned = Arc::new(AtomicBool::new(false));
        let caller = {
            let pool = Arc::clone(&pool);
            let job = job.clone();
            let returned = Arc::clone(&fourth_returned);
            thread::spawn(move || {
                pool.run_thread(job);
                returned.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!fourth_returned.load(Ordering::SeqCst));
        assert_eq!(pool.thread_count(), 3);

        release.store(true, Ordering::SeqCst);
        caller.join().unwrap();
        assert!(fourth_returned.load(Ordering::SeqCst));
        assert!(wait_until(Duration::from_secs(5), || pool.available_count() == 3));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.thread_count(), 3);
    }

    fn failing_spawner(name: String, _body: ThreadBody) -> Result<Thread, ThreadError> {
        Err(ThreadError::Spawn {
            name,
            source: std::io::Error::other("out of threads"),
        })
    }

    #[test]
    fn test_spawn_failure_degrades_to_inline() {
        let pool = ThreadPool::with_spawner(0, 2, failing_spawner);
        let ran_on = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&ran_on);
        let handed_off = pool.run_thread(move || {
            *slot.lock().unwrap() = Some(thread::current().id());
        });

        assert!(!handed_off);
        assert_eq!(*ran_on.lock().unwrap(), Some(thread::current().id()));
        assert_eq!(pool.thread_limit(), 0);
        assert_eq!(pool.thread_count(), 0);
    }

    static SPAWN_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn second_spawn_fails(name: String, body: ThreadBody) -> Result<Thread, ThreadError> {
        if SPAWN_CALLS.fetch_add(1, Ordering::SeqCst) == 1 {
            return failing_spawner(name, body);
        }
        Thread::spawn(name, body)
    }

    #[test]
    fn test_partial_spawn_failure_loses_one_slot() {
        let pool = ThreadPool::with_spawner(2, 3, second_spawn_fails);
        assert_eq!(pool.thread_count(), 1);
        assert_eq!(pool.thread_limit(), 2);

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&done);
            assert!(pool.run_thread(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 4));
        assert!(pool.thread_count() <= 2);
    }

    #[test]
    fn test_panic_is_contained() {
        let pool = ThreadPool::new(0, 1);
        assert!(pool.run_thread(|| panic!("pool function failed")));
        assert!(wait_until(Duration::from_secs(5), || pool.available_count() == 1));

        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        assert!(pool.run_thread(move || flag.store(true, Ordering::SeqCst)));
        assert!(wait_until(Duration::from_secs(5), || done.load(Ordering::SeqCst)));
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_drop_waits_for_running_functions() {
        let finished = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(0, 4);
            for _ in 0..4 {
                let counter = Arc::clone(&finished);
                pool.run_thread(move || {
                    thread::sleep(Duration::from_millis(30));
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_zero_limit_runs_inline() {
        let pool = ThreadPool::new(0, 0);
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        assert!(!pool.run_thread(move || flag.store(true, Ordering::SeqCst)));
        assert!(ran.load(Ordering::SeqCst));
    }
}
