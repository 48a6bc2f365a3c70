//! Record schemas for the intake API and the store
//!
//! - [`TransactionRecord`]: the candidate submitted by a caller
//! - [`StoredTransaction`]: the persisted row, with its normalized date and
//!   authoritative insertion timestamp
//! - [`TransactionDate`]: a wall-clock value tagged with its timezone kind

pub mod transaction;

pub use transaction::{
    DateKind, DateParseError, StoredTransaction, TransactionDate, TransactionRecord,
};
