//!
//! tessel-runtime - Facade for the tessel Substrate
//!
//! Re-exports the public surface of every tessel layer and provides
//! `Runtime`, the single entry point that configures the substrate and
//! drives the process lifecycle:
//!
//! ```ignore
//! let runtime = Runtime::init(RuntimeConfig::from_env()?)?;
//! execute_threaded_task(pixels.len(), &pixels, |i, pixels| shade(&pixels[i]));
//! sink().output_str("frame done\n");
//! runtime.shutdown();
//! ```
//!
//! The diagnostic sink and the thread pools work without a `Runtime` as
//! well; the sink then simply delivers synchronously.
//!

pub mod errors;
pub mod logging;
pub mod runtime;

pub use errors::RuntimeError;
pub use logging::LOG_ENV;
pub use runtime::Runtime;

pub use tessel_core::config::{CONFIG_ENV, DEFAULT_BUFFER_CAPACITY};
pub use tessel_core::lifecycle;
pub use tessel_core::{
    CORE_PRIORITY, ConfigError, Hook, LogConfig, PoolConfig, RouterConfig, RuntimeConfig,
    SpinConfig, YieldPolicy, processor_count,
};

pub use tessel_sync::{
    AtomicPointer, AtomicWord, BlockingObject, MutexGuard, MutexLock, ReadGuard, RwSleepLock,
    SpinGuard, SpinLock, Thread, ThreadContext, ThreadError, WriteGuard, set_yield_policy,
    yield_policy,
};

pub use tessel_debug::{
    Attachable, CaptureOutput, ConsoleOutput, FileMode, FileOutput, NodeId, NodeRef, OutputNode,
    RouterError, RouterInput, RouterOutput, default_capacity, init_sink, register_sink_hook,
    report_error, set_default_capacity, shutdown_sink, sink,
};

pub use tessel_threads::{
    POOL_HOOK, ThreadPool, configure_global_pool, execute_threaded_task, execute_threaded_task_in,
    register_pool_hook,
};
