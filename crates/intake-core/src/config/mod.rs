//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables
//! 3. Config file (`--config`, else `txn-intake.toml` in the current directory)
//! 4. Defaults

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, DEFAULT_CONFIG_FILE, resolve_config};
pub use types::{Config, ServerConfig, StoreBackend, StoreConfig, TransactionsConfig};
