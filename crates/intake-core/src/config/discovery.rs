//! Configuration discovery and resolution

use super::types::{Config, StoreBackend};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// File name looked up in the current directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "txn-intake.toml";

pub const ENV_BIND: &str = "TXN_INTAKE_BIND";
pub const ENV_DB: &str = "TXN_INTAKE_DB";
pub const ENV_STORE: &str = "TXN_INTAKE_STORE";
pub const ENV_STRICT_IDEMPOTENCY: &str = "TXN_INTAKE_STRICT_IDEMPOTENCY";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`Config`]
    #[error("Failed to parse config {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Override listen address
    pub bind: Option<String>,
    /// Override SQLite database path
    pub db_path: Option<PathBuf>,
    /// Override store backend
    pub backend: Option<StoreBackend>,
    /// Force strict idempotency on
    pub strict_idempotency: Option<bool>,
    /// Path to config file override
    pub config_path: Option<PathBuf>,
}

/// Resolve configuration from all sources
///
/// An explicit `config_path` that cannot be loaded is an error. The implicit
/// `txn-intake.toml` is optional; if it exists but fails to load it is
/// skipped with a warning.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    current_dir: &Path,
) -> Result<Config, ConfigError> {
    let mut config = Config::default();

    // 3. Config file
    if let Some(path) = &overrides.config_path {
        config = load_config_file(path)?;
        debug!("Loaded config from {}", path.display());
    } else {
        let implicit = current_dir.join(DEFAULT_CONFIG_FILE);
        if implicit.exists() {
            match load_config_file(&implicit) {
                Ok(file_config) => {
                    config = file_config;
                    debug!("Loaded config from {}", implicit.display());
                }
                Err(e) => warn!("Ignoring config file: {e}"),
            }
        }
    }

    // 2. Environment variables
    apply_env_overrides(&mut config);

    // 1. Command-line overrides
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Load config from a TOML file
fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Config) {
    if let Ok(bind) = std::env::var(ENV_BIND) {
        config.server.bind = bind;
    }

    if let Ok(path) = std::env::var(ENV_DB) {
        config.store.path = PathBuf::from(path);
    }

    if let Ok(raw) = std::env::var(ENV_STORE) {
        match raw.parse::<StoreBackend>() {
            Ok(backend) => config.store.backend = backend,
            Err(e) => warn!("Ignoring {ENV_STORE}: {e}"),
        }
    }

    if let Ok(raw) = std::env::var(ENV_STRICT_IDEMPOTENCY) {
        match parse_bool(&raw) {
            Some(strict) => config.transactions.strict_idempotency = strict,
            None => warn!("Ignoring {ENV_STRICT_IDEMPOTENCY}: expected a boolean, got '{raw}'"),
        }
    }
}

/// Apply command-line overrides
fn apply_cli_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(ref bind) = overrides.bind {
        config.server.bind = bind.clone();
    }

    if let Some(ref path) = overrides.db_path {
        config.store.path = path.clone();
    }

    if let Some(backend) = overrides.backend {
        config.store.backend = backend;
    }

    if let Some(strict) = overrides.strict_idempotency {
        config.transactions.strict_idempotency = strict;
    }
}
