///
/// # Runtime Configuration
///
/// `RuntimeConfig` gathers every tunable of the substrate. It is read from
/// a TOML file; every section and every field is optional and falls back
/// to the defaults below.
///
/// ## Example tessel.toml
///
/// ```toml
/// [pool]
/// initial_threads = 2
/// max_threads = 16
///
/// [router]
/// buffer_capacity = 32768
///
/// [spin]
/// yield_policy = "auto"
///
/// [log]
/// filter = "info,tessel_threads=debug"
/// file = "tessel.log"
/// console = true
/// ```
///
/// `max_threads` defaults to four threads per processor so that nested
/// parallel tasks still find free slots in the global pool.
///

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;
use crate::system::processor_count;

/// Environment variable holding the path of the config file
pub const CONFIG_ENV: &str = "TESSEL_CONFIG";

pub const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub pool: PoolConfig,
    pub router: RouterConfig,
    pub spin: SpinConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub initial_threads: usize,
    pub max_threads: Option<usize>,
}

impl PoolConfig {
    pub fn effective_max_threads(&self) -> usize {
        self.max_threads
            .unwrap_or_else(|| processor_count() * 4)
            .max(self.initial_threads)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    pub buffer_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

/// When a contended spin lock gives up its time slice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YieldPolicy {
    /// Decide from the processor count
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpinConfig {
    pub yield_policy: YieldPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub filter: String,
    pub file: Option<PathBuf>,
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
            console: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from the file named by `TESSEL_CONFIG`, or defaults when unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_path(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "pool.max_threads",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(max) = self.pool.max_threads {
            if self.pool.initial_threads > max {
                return Err(ConfigError::InvalidValue {
                    field: "pool.initial_threads",
                    reason: format!("{} exceeds max_threads {}", self.pool.initial_threads, max),
                });
            }
        }
        if self.router.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "router.buffer_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config.pool.initial_threads, 0);
        assert_eq!(config.pool.effective_max_threads(), processor_count() * 4);
        assert_eq!(config.router.buffer_capacity, DEFAULT_BUFFER_CAPACITY);
        assert_eq!(config.spin.yield_policy, YieldPolicy::Auto);
        assert_eq!(config.log.filter, "info");
        assert!(config.log.console);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            [pool]
            initial_threads = 2
            max_threads = 8

            [router]
            buffer_capacity = 1024

            [spin]
            yield_policy = "never"

            [log]
            filter = "debug"
            file = "out.log"
            console = false
        "#;
        let config = RuntimeConfig::from_toml_str(text).unwrap();
        assert_eq!(config.pool.initial_threads, 2);
        assert_eq!(config.pool.effective_max_threads(), 8);
        assert_eq!(config.router.buffer_capacity, 1024);
        assert_eq!(config.spin.yield_policy, YieldPolicy::Never);
        assert_eq!(config.log.file, Some(PathBuf::from("out.log")));
        assert!(!config.log.console);
    }

    #[test]
    fn test_invalid_values() {
        let err = RuntimeConfig::from_toml_str("[pool]\nmax_threads = 0").unwrap_err();
        assert!(err.to_string().contains("pool.max_threads"));

        let err = RuntimeConfig::from_toml_str("[pool]\ninitial_threads = 5\nmax_threads = 2")
            .unwrap_err();
        assert!(err.to_string().contains("pool.initial_threads"));

        let err = RuntimeConfig::from_toml_str("[router]\nbuffer_capacity = 0").unwrap_err();
        assert!(err.to_string().contains("router.buffer_capacity"));

        assert!(matches!(
            RuntimeConfig::from_toml_str("[pool]\nbogus = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[router]\nbuffer_capacity = 64").unwrap();
        let config = RuntimeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.router.buffer_capacity, 64);

        let missing = RuntimeConfig::from_path(Path::new("/nonexistent/tessel.toml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
