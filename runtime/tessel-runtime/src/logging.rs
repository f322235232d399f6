//!
//! Tracing Output
//!
//! Installs a `tracing-subscriber` fmt layer whose writer is the global
//! diagnostic sink, so every tracing event becomes one `output` call on
//! that `RouterInput` and reaches whatever is attached to it.
//!

use tessel_core::LogConfig;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding `[log] filter`
pub const LOG_ENV: &str = "TESSEL_LOG";

pub fn filter_for(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// Install the global subscriber. Returns false when one is already set,
/// which leaves the existing subscriber (and its sink writer) in place.
pub fn install(config: &LogConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(config))
        .with_writer(tessel_debug::sink)
        .with_ansi(false)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
