///
/// Configuration error types.
///
/// Everything that can go wrong while loading or validating a
/// `RuntimeConfig`: unreadable files, malformed TOML, and values that
/// parse but make no sense.
///

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ConfigError::Read {
            path: PathBuf::from("/tmp/tessel.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("Failed to read config"));
        assert!(err.to_string().contains("/tmp/tessel.toml"));

        let err = ConfigError::InvalidValue {
            field: "pool.max_threads",
            reason: "must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("pool.max_threads"));
        assert!(err.to_string().contains("at least 1"));
    }
}
