///
/// Thread error types.
///

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
