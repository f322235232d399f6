//!
//! Runtime - Init/Shutdown Driver
//!
//! `Runtime::init` brings the substrate up in a fixed order:
//!
//! 1. validate the configuration and apply the process-wide settings
//!    (spin yield policy, router buffer capacity, global pool size)
//! 2. attach the configured log outputs to the diagnostic sink
//! 3. install the tracing subscriber writing into the sink
//! 4. register the core lifecycle hooks and run `lifecycle::init`
//!
//! Only one `Runtime` exists at a time. Dropping it runs
//! `lifecycle::shutdown`, which drains the sink back to synchronous mode,
//! and then detaches the log outputs it attached. Outputs attached to the
//! sink by anyone else stay attached.
//!

use std::sync::atomic::{AtomicBool, Ordering};

use tessel_core::{RuntimeConfig, lifecycle};
use tessel_debug::{
    ConsoleOutput, FileMode, FileOutput, OutputNode, register_sink_hook, set_default_capacity, sink,
};
use tessel_sync::set_yield_policy;
use tessel_threads::{configure_global_pool, register_pool_hook};

use crate::errors::RuntimeError;
use crate::logging;

static ACTIVE: AtomicBool = AtomicBool::new(false);

pub struct Runtime {
    config: RuntimeConfig,
    console: Option<OutputNode<ConsoleOutput>>,
    file: Option<OutputNode<FileOutput>>,
}

impl Runtime {
    pub fn init(config: RuntimeConfig) -> Result<Runtime, RuntimeError> {
        if ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RuntimeError::AlreadyInitialized);
        }

        match Self::start(config) {
            Ok(runtime) => Ok(runtime),
            Err(err) => {
                ACTIVE.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// `init` with the configuration named by `TESSEL_CONFIG`
    pub fn from_env() -> Result<Runtime, RuntimeError> {
        Self::init(RuntimeConfig::from_env()?)
    }

    fn start(config: RuntimeConfig) -> Result<Runtime, RuntimeError> {
        config.validate()?;

        set_yield_policy(config.spin.yield_policy);
        set_default_capacity(config.router.buffer_capacity);
        if !configure_global_pool(&config.pool) {
            tracing::debug!("global thread pool already created; [pool] settings ignored");
        }

        let file = match &config.log.file {
            Some(path) => Some(OutputNode::new(FileOutput::create(path, FileMode::Text)?)),
            None => None,
        };
        let console = config.log.console.then(|| OutputNode::new(ConsoleOutput::stderr()));
        if let Some(node) = &file {
            sink().add_output(node);
        }
        if let Some(node) = &console {
            sink().add_output(node);
        }

        if !logging::install(&config.log) {
            tracing::debug!("tracing subscriber already installed");
        }

        register_sink_hook();
        register_pool_hook();
        if !lifecycle::init() {
            detach(&console, &file);
            return Err(RuntimeError::AlreadyInitialized);
        }

        tracing::info!(
            pool_max = config.pool.effective_max_threads(),
            buffer = config.router.buffer_capacity,
            "tessel runtime started"
        );
        Ok(Runtime {
            config,
            console,
            file,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_active() -> bool {
        ACTIVE.load(Ordering::SeqCst)
    }

    /// Same as dropping the runtime
    pub fn shutdown(self) {}
}

fn detach(console: &Option<OutputNode<ConsoleOutput>>, file: &Option<OutputNode<FileOutput>>) {
    if let Some(node) = console {
        sink().remove_output(node, true);
    }
    if let Some(node) = file {
        sink().remove_output(node, true);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        tracing::info!("tessel runtime stopping");
        lifecycle::shutdown();
        detach(&self.console, &self.file);
        ACTIVE.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("console", &self.console.is_some())
            .field("file", &self.file.as_ref().map(|node| node.path().to_path_buf()))
            .finish()
    }
}
