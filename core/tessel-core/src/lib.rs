//!
//! tessel-core - Process Lifecycle and Configuration
//!
//! This crate provides the pieces shared by every tessel layer:
//!
//! - `lifecycle` - a process-wide list of init/shutdown hooks ordered by
//!   numeric priority. Core hooks register at `CORE_PRIORITY`; subsystems
//!   that depend on the core register with a larger number.
//! - `config` - `RuntimeConfig`, deserialized from TOML with every field
//!   defaulted.
//! - `system` - cached processor count.
//!

pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod system;

pub use config::{LogConfig, PoolConfig, RouterConfig, RuntimeConfig, SpinConfig, YieldPolicy};
pub use errors::ConfigError;
pub use lifecycle::{CORE_PRIORITY, Hook};
pub use system::processor_count;
