//!
//! Process Lifecycle Hooks
//!
//! A single process-wide list of init/shutdown callbacks. Each hook carries
//! a numeric priority: `init()` runs hooks lowest priority first, and
//! `shutdown()` runs them highest priority first, so a subsystem registered
//! above `CORE_PRIORITY` can rely on the core (diagnostic sink, thread pool)
//! being up for the whole time its own hooks run.
//!
//! The initialized flag is raised before init hooks run and lowered before
//! shutdown hooks run. Code that checks `is_initialized()` from inside a
//! hook therefore sees "running" during init and "stopped" during shutdown.
//!
//! Registering a hook whose name is already present replaces the earlier
//! entry, which makes registration idempotent across init/shutdown cycles.
//!

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Priority used by the tessel core hooks
pub const CORE_PRIORITY: i32 = 0;

pub type HookFn = fn();

#[derive(Debug, Clone, Copy)]
pub struct Hook {
    pub name: &'static str,
    pub priority: i32,
    pub init: Option<HookFn>,
    pub shutdown: Option<HookFn>,
}

impl Hook {
    pub const fn new(name: &'static str, priority: i32) -> Self {
        Self {
            name,
            priority,
            init: None,
            shutdown: None,
        }
    }

    pub const fn on_init(mut self, f: HookFn) -> Self {
        self.init = Some(f);
        self
    }

    pub const fn on_shutdown(mut self, f: HookFn) -> Self {
        self.shutdown = Some(f);
        self
    }
}

static HOOKS: Mutex<Vec<Hook>> = Mutex::new(Vec::new());
static TRANSITION: Mutex<()> = Mutex::new(());
static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn hooks() -> MutexGuard<'static, Vec<Hook>> {
    HOOKS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register a hook, replacing any earlier hook with the same name
pub fn register(hook: Hook) {
    let mut hooks = hooks();
    if let Some(existing) = hooks.iter_mut().find(|h| h.name == hook.name) {
        *existing = hook;
    } else {
        hooks.push(hook);
    }
}

/// Remove a hook by name. Returns false when no such hook was registered.
pub fn unregister(name: &str) -> bool {
    let mut hooks = hooks();
    let before = hooks.len();
    hooks.retain(|h| h.name != name);
    hooks.len() != before
}

pub fn is_registered(name: &str) -> bool {
    hooks().iter().any(|h| h.name == name)
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

/// Hooks sorted by ascending priority; equal priorities keep registration order
fn ordered_hooks() -> Vec<Hook> {
    let mut ordered = hooks().clone();
    ordered.sort_by_key(|h| h.priority);
    ordered
}

/// Run every init hook, lowest priority first.
///
/// Returns false without running anything when the process is already
/// initialized.
pub fn init() -> bool {
    let _transition = TRANSITION.lock().unwrap_or_else(PoisonError::into_inner);
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return false;
    }

    for hook in ordered_hooks() {
        if let Some(f) = hook.init {
            tracing::debug!(hook = hook.name, priority = hook.priority, "running init hook");
            f();
        }
    }
    true
}

/// Run every shutdown hook, highest priority first.
///
/// Returns false without running anything when the process is not
/// initialized.
pub fn shutdown() -> bool {
    let _transition = TRANSITION.lock().unwrap_or_else(PoisonError::into_inner);
    if !INITIALIZED.swap(false, Ordering::SeqCst) {
        return false;
    }

    for hook in ordered_hooks().into_iter().rev() {
        if let Some(f) = hook.shutdown {
            tracing::debug!(hook = hook.name, priority = hook.priority, "running shutdown hook");
            f();
        }
    }
    true
}
