//!
//! tessel-debug - Diagnostic Router Graph
//!
//! Producers write opaque bytes into a `RouterInput`; the input forwards
//! them to every attached output, either on the producer's thread or via
//! its background mover. Inputs can be attached to other inputs, so data
//! can be chained and fanned out into trees:
//!
//! ```ignore
//! let root = RouterInput::new();
//! let file = OutputNode::new(FileOutput::create("diag.log", FileMode::Text)?);
//! let console = OutputNode::new(ConsoleOutput::stderr());
//! root.add_output(&file);
//! root.add_output(&console);
//! root.output_str("hello\n");
//! ```
//!
//! ## Ordering
//!
//! Bytes from one `output` call are never interleaved with other calls to
//! the same input, and reach each output in call order. Two different
//! inputs feeding one output interleave arbitrarily, call by call.
//!
//! ## Global Sink
//!
//! `sink()` returns the process-wide input used for error reports. Its
//! lifecycle hooks (`register_sink_hook`) run it asynchronously between
//! init and shutdown and synchronously outside that window.
//!

pub mod errors;
pub mod input;
pub mod output;
pub mod outputs;
pub mod sink;

pub use errors::RouterError;
pub use input::{RouterInput, default_capacity, set_default_capacity};
pub use output::{Attachable, NodeId, NodeRef, OutputNode, RouterOutput};
pub use outputs::{CaptureOutput, ConsoleOutput, FileMode, FileOutput};
pub use sink::{
    init_sink, panic_message, register_sink_hook, report_error, shutdown_sink, sink,
};
