///
/// Router error types.
///

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Failed to open output {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = RouterError::Open {
            path: PathBuf::from("/var/log/tessel.log"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("Failed to open output"));
        assert!(err.to_string().contains("/var/log/tessel.log"));
        assert!(err.to_string().contains("denied"));
    }
}
