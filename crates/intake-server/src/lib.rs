//! HTTP surface for txn-intake
//!
//! Routes:
//!
//! - `POST /api/v1/Transaction`: create (idempotent, capacity-bounded)
//! - `GET /api/v1/Transaction?id=<uuid>`: lookup
//! - `GET /healthz`
//!
//! Expected failures are reported as `application/problem+json` bodies, see
//! [`problem`].

pub mod problem;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use txn_intake_core::config::{Config, StoreBackend};
use txn_intake_core::{InsertEngine, MemoryStore, RecordStore, SqliteStore, StoreError};

pub const TRANSACTION_PATH: &str = "/api/v1/Transaction";

/// Shared handler state
#[derive(Clone, Debug)]
pub struct AppState {
    pub engine: InsertEngine,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to open record store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("HTTP server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Build the application router around `engine`.
pub fn router(engine: InsertEngine) -> Router {
    Router::new()
        .route(
            TRANSACTION_PATH,
            get(routes::get_transaction).post(routes::create_transaction),
        )
        .route("/healthz", get(routes::healthz))
        .with_state(AppState { engine })
}

/// Open and provision the record store selected by `config`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn RecordStore>, StoreError> {
    let store: Arc<dyn RecordStore> = match config.store.backend {
        StoreBackend::Sqlite => {
            info!("Using SQLite store at {}", config.store.path.display());
            Arc::new(SqliteStore::with_busy_timeout(
                config.store.path.clone(),
                config.busy_timeout(),
            ))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store; transactions are lost on exit");
            Arc::new(MemoryStore::new())
        }
    };
    store.provision().await?;
    Ok(store)
}

/// Serve `app` on `listener` until `cancel` fires, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(ServerError::Serve)
}

/// Provision the store, bind the configured address and serve until cancelled.
pub async fn run(config: &Config, cancel: CancellationToken) -> Result<(), ServerError> {
    let store = open_store(config).await?;
    let engine = InsertEngine::new(store, config.transactions.strict_idempotency);

    let listener = TcpListener::bind(config.server.bind.as_str())
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.server.bind.clone(),
            source,
        })?;
    let local = listener
        .local_addr()
        .map_err(|source| ServerError::Bind {
            addr: config.server.bind.clone(),
            source,
        })?;
    info!(
        strict_idempotency = engine.strict_idempotency(),
        max = engine.max(),
        "Listening on http://{local}"
    );

    serve(listener, router(engine), cancel).await
}
