//! Core types and insert protocol for txn-intake
//!
//! This crate owns everything between the HTTP surface and the database:
//!
//! - [`schema`]: the candidate and stored transaction records
//! - [`normalize`]: timestamp-kind normalization to absolute UTC instants
//! - [`idempotency`]: replay vs. conflict decisions for known identifiers
//! - [`capacity`]: the bounded admission gate
//! - [`store`]: the record store abstraction plus SQLite and in-memory stores
//! - [`engine`]: the transactional, idempotent insert protocol
//!
//! Amounts are exact decimals end to end; no floating point is involved in
//! storage or comparison.

pub mod capacity;
pub mod config;
pub mod engine;
pub mod idempotency;
pub mod logging;
pub mod normalize;
pub mod schema;
pub mod store;
pub mod validation;

pub use capacity::MAX_TRANSACTIONS;
pub use engine::{CreateOutcome, EngineError, InsertEngine};
pub use schema::{DateKind, StoredTransaction, TransactionDate, TransactionRecord};
pub use store::{MemoryStore, RecordStore, SqliteStore, StoreError, UnitOfWork};
