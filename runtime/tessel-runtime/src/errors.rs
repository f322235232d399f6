///
/// Runtime error types.
///

use tessel_core::ConfigError;
use tessel_debug::RouterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Invalid runtime configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to open log output: {0}")]
    Output(#[from] RouterError),

    #[error("tessel runtime is already initialized")]
    AlreadyInitialized,
}
