//! Shared logging initialization for txn-intake binaries.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

/// Environment variable selecting the log level.
pub const LOG_ENV: &str = "TXN_INTAKE_LOG";

fn parse_level(raw: Option<&str>) -> tracing::Level {
    match raw.unwrap_or("info").trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Initialize process-level tracing output from `TXN_INTAKE_LOG`.
///
/// `verbose` forces `DEBUG` regardless of the environment. Safe to call
/// multiple times; only the first call installs the subscriber.
pub fn init(verbose: bool) {
    if INIT.get().is_some() {
        return;
    }
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        parse_level(std::env::var(LOG_ENV).ok().as_deref())
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    let _ = INIT.set(());
}
