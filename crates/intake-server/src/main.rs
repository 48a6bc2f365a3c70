//! txn-intake - HTTP service for idempotent transaction intake

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use txn_intake_core::config::{ConfigOverrides, StoreBackend, resolve_config};

/// txn-intake - HTTP service for idempotent transaction intake
#[derive(Parser, Debug)]
#[command(name = "txn-intake")]
#[command(about = "Idempotent, capacity-bounded transaction intake service")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on (e.g. 127.0.0.1:8080)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// SQLite database file
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Keep transactions in memory only (lost on exit)
    #[arg(long, conflicts_with = "db")]
    memory: bool,

    /// Reject replays whose payload differs from the stored transaction
    #[arg(long)]
    strict_idempotency: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    txn_intake_core::logging::init(args.verbose);

    info!("txn-intake {} starting...", env!("CARGO_PKG_VERSION"));

    let current_dir = std::env::current_dir().context("Failed to get current directory")?;

    let overrides = ConfigOverrides {
        bind: args.bind.clone(),
        db_path: args.db.clone(),
        backend: args.memory.then_some(StoreBackend::Memory),
        strict_idempotency: args.strict_idempotency.then_some(true),
        config_path: args.config.clone(),
    };

    let config =
        resolve_config(&overrides, &current_dir).context("Failed to resolve configuration")?;

    if let Some(config_path) = &args.config {
        info!("Loaded config from: {}", config_path.display());
    } else {
        info!("Using resolved configuration");
    }

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    // Set up signal handlers
    let cancel_for_signals = cancel_token.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        cancel_for_signals.cancel();
    });

    txn_intake_server::run(&config, cancel_token)
        .await
        .context("Transaction service failed")?;

    info!("txn-intake shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                if ctrl_c.await.is_ok() {
                    info!("Received SIGINT (Ctrl+C)");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if ctrl_c.await.is_ok() {
            info!("Received Ctrl+C");
        }
    }
}
