//! Error types for record store operations

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// A record with this identifier is already stored
    ///
    /// Raised by `insert` (or `commit`) when a concurrent unit of work won
    /// the race for the same identifier.
    #[error("Transaction {id} already exists")]
    DuplicateKey { id: Uuid },

    /// Database engine failure (open, busy timeout, constraint, I/O)
    #[error("Database error on {path}: {source}")]
    Database {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// File system error while preparing the database location
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored row could not be decoded
    #[error("Corrupt row for transaction {id}: {message}")]
    Corrupt { id: String, message: String },

    /// The capacity counter row is missing; the store was never provisioned
    #[error("Capacity counter missing; store is not provisioned")]
    NotProvisioned,

    /// The blocking worker running a store call failed
    #[error("Store worker failed: {message}")]
    Worker { message: String },

    /// The unit of work was used after it lost its connection
    #[error("Unit of work is no longer usable")]
    UnitClosed,
}

impl StoreError {
    /// True for the uniqueness violation the insert engine reconciles.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}
