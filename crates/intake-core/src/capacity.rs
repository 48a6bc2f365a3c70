//! Bounded admission gate
//!
//! The store never holds more than [`MAX_TRANSACTIONS`] records. Admission is
//! a single conditional increment of the store's counter inside the caller's
//! unit of work, so two requests racing for the last slot cannot both win,
//! and a rolled-back unit gives its slot back.

use tracing::warn;

use crate::store::{StoreError, UnitOfWork};

/// Fixed maximum number of stored transactions.
pub const MAX_TRANSACTIONS: u32 = 100;

/// Reserve one slot below `max` inside `unit`.
///
/// Returns `false` when the store is full. The reservation becomes permanent
/// only when `unit` commits.
pub async fn try_reserve(unit: &mut dyn UnitOfWork, max: u32) -> Result<bool, StoreError> {
    let admitted = unit.increment_if_below(max).await?;
    if !admitted {
        warn!(max, "Capacity reached; refusing new transaction");
    }
    Ok(admitted)
}
