//!
//! Process-wide Diagnostic Sink
//!
//! One `RouterInput` shared by the whole process. Any subsystem may write
//! to it at any time:
//!
//! - before lifecycle init and after shutdown it delivers synchronously
//! - between init and shutdown it runs its background mover
//!
//! The instance is created on first use and never replaced. The lifecycle
//! hooks only promote and demote it, so outputs attached at any point
//! stay attached across every init/shutdown cycle.
//!

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;

use tessel_core::lifecycle::{self, CORE_PRIORITY, Hook};

use crate::input::{RouterInput, default_capacity};

pub const SINK_HOOK: &str = "tessel.debug.sink";

static SINK: OnceLock<RouterInput> = OnceLock::new();

/// The process-wide diagnostic sink
pub fn sink() -> &'static RouterInput {
    SINK.get_or_init(|| RouterInput::with_capacity(default_capacity()))
}

pub fn init_sink() {
    sink().start_threaded();
}

/// Deliver everything still buffered and fall back to synchronous mode
pub fn shutdown_sink() {
    sink().demote();
}

/// Register the sink's init/shutdown hooks at core priority
pub fn register_sink_hook() {
    lifecycle::register(
        Hook::new(SINK_HOOK, CORE_PRIORITY)
            .on_init(init_sink)
            .on_shutdown(shutdown_sink),
    );
}

/// Write an error line to the sink.
///
/// Never fails; a report made while the sink itself is delivering on this
/// thread is dropped.
pub fn report_error(message: impl fmt::Display) {
    sink().output_fmt(format_args!("[tessel] error: {}\n", message));
}

/// Text of a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&str>() {
        *text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::CaptureOutput;
    use crate::output::OutputNode;

    #[test]
    fn test_report_reaches_attached_output() {
        let capture = OutputNode::new(CaptureOutput::unbuffered());
        sink().add_output(&capture);
        report_error(format_args!("disk {} is full", 3));
        assert!(capture.text().contains("[tessel] error: disk 3 is full\n"));
        sink().remove_output(&capture, false);
    }

    #[test]
    fn test_sink_is_stable() {
        assert_eq!(sink().id(), sink().id());
    }
}
