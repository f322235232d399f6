//!
//! Thread - OS Thread with Cooperative End
//!
//! Wraps one named OS thread running a body closure. The body receives a
//! `ThreadContext` and is expected to poll `is_ending()` and return once
//! an end has been requested. Nothing forces it to: ending is cooperative.
//!
//! Dropping a `Thread` requests an end and joins it, so the body must not
//! block forever without checking the flag (or without some other wakeup
//! that its owner triggers before the drop).
//!

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crate::errors::ThreadError;

/// View of the owning `Thread` handed to the body
#[derive(Clone)]
pub struct ThreadContext {
    ending: Arc<AtomicBool>,
}

impl ThreadContext {
    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::SeqCst)
    }
}

pub struct Thread {
    name: String,
    ending: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, ThreadError>
    where
        F: FnOnce(&ThreadContext) + Send + 'static,
    {
        let name = name.into();
        let ending = Arc::new(AtomicBool::new(false));
        let context = ThreadContext {
            ending: Arc::clone(&ending),
        };

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(&context))
            .map_err(|source| ThreadError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            ending,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// True when called from inside this thread's body
    pub fn is_current(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    pub fn request_end(&self) {
        self.ending.store(true, Ordering::SeqCst);
    }

    pub fn is_ending(&self) -> bool {
        self.ending.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Request an end and wait for the body to return.
    ///
    /// Returns false when the body panicked.
    pub fn join(mut self) -> bool {
        self.join_inner()
    }

    fn join_inner(&mut self) -> bool {
        self.request_end();
        let Some(handle) = self.handle.take() else {
            return true;
        };
        if handle.thread().id() == thread::current().id() {
            tracing::warn!(thread = %self.name, "thread asked to join itself; detaching");
            return true;
        }
        match handle.join() {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(thread = %self.name, "thread body panicked");
                false
            }
        }
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.join_inner();
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("ending", &self.is_ending())
            .field("finished", &self.is_finished())
            .finish()
    }
}
