//! Transactional, idempotent insert protocol
//!
//! One request runs as:
//!
//! 1. look the identifier up inside a fresh unit of work
//! 2. if it exists, commit the (read-only) unit and let
//!    [`idempotency::resolve`] decide between replay and conflict
//! 3. otherwise reserve a capacity slot; refused means roll back and report
//!    [`CreateOutcome::CapacityExhausted`], admitted means insert and commit
//! 4. if the insert or commit loses a race on the identifier, roll back and
//!    look the identifier up once more outside any unit of work; found goes
//!    to step 2, missing is [`EngineError::RaceUnresolved`]
//!
//! Step 4 runs at most once per request.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::capacity::{MAX_TRANSACTIONS, try_reserve};
use crate::idempotency::{self, MismatchedField};
use crate::schema::{StoredTransaction, TransactionRecord};
use crate::store::{RecordStore, StoreError};

/// Result of a create request that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The candidate was stored by this request.
    Inserted { insert_date_time: DateTime<Utc> },
    /// The identifier was already stored; reports the first insertion time.
    Replayed {
        insert_date_time: DateTime<Utc>,
        existing: StoredTransaction,
    },
    /// The store is full; nothing was written.
    CapacityExhausted { max: u32 },
    /// Strict mode only: same identifier, different payload.
    Conflict {
        existing: StoredTransaction,
        mismatched: Vec<MismatchedField>,
    },
}

impl CreateOutcome {
    /// Insertion timestamp to report to the caller, if the request succeeded.
    pub fn insert_date_time(&self) -> Option<DateTime<Utc>> {
        match self {
            CreateOutcome::Inserted { insert_date_time }
            | CreateOutcome::Replayed {
                insert_date_time, ..
            } => Some(*insert_date_time),
            CreateOutcome::CapacityExhausted { .. } | CreateOutcome::Conflict { .. } => None,
        }
    }
}

/// Unexpected failures of the insert protocol
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A duplicate-key failure whose record could not be found afterwards
    #[error("Transaction {id} reported as duplicate but not found on re-read")]
    RaceUnresolved { id: Uuid },
}

/// Runs create and lookup requests against a [`RecordStore`].
#[derive(Clone)]
pub struct InsertEngine {
    store: Arc<dyn RecordStore>,
    strict_idempotency: bool,
    max: u32,
}

impl std::fmt::Debug for InsertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsertEngine")
            .field("strict_idempotency", &self.strict_idempotency)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

enum Attempt {
    Done(CreateOutcome),
    LostRace,
}

impl InsertEngine {
    pub fn new(store: Arc<dyn RecordStore>, strict_idempotency: bool) -> Self {
        Self {
            store,
            strict_idempotency,
            max: MAX_TRANSACTIONS,
        }
    }

    pub fn strict_idempotency(&self) -> bool {
        self.strict_idempotency
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Create `record` with `insert_date_time` as its insertion timestamp.
    ///
    /// `insert_date_time` should be captured when request handling starts.
    /// Expected outcomes (replay, conflict, full store) are values, not errors.
    pub async fn create(
        &self,
        record: &TransactionRecord,
        insert_date_time: DateTime<Utc>,
    ) -> Result<CreateOutcome, EngineError> {
        let candidate = record.to_stored(insert_date_time);

        match self.attempt(&candidate).await? {
            Attempt::Done(outcome) => Ok(outcome),
            Attempt::LostRace => {
                debug!(id = %candidate.id, "Lost insert race; re-reading stored transaction");
                match self.store.get_by_id(candidate.id).await? {
                    Some(existing) => Ok(idempotency::resolve(
                        existing,
                        &candidate,
                        self.strict_idempotency,
                    )),
                    None => {
                        error!(
                            id = %candidate.id,
                            "Duplicate key reported but transaction is missing"
                        );
                        Err(EngineError::RaceUnresolved { id: candidate.id })
                    }
                }
            }
        }
    }

    async fn attempt(&self, candidate: &StoredTransaction) -> Result<Attempt, StoreError> {
        let mut unit = self.store.begin_unit_of_work().await?;

        if let Some(existing) = unit.get_by_id(candidate.id).await? {
            unit.commit().await?;
            return Ok(Attempt::Done(idempotency::resolve(
                existing,
                candidate,
                self.strict_idempotency,
            )));
        }

        if !try_reserve(unit.as_mut(), self.max).await? {
            unit.rollback().await?;
            return Ok(Attempt::Done(CreateOutcome::CapacityExhausted { max: self.max }));
        }

        if let Err(e) = unit.insert(candidate).await {
            return if e.is_duplicate_key() {
                unit.rollback().await?;
                Ok(Attempt::LostRace)
            } else {
                Err(e)
            };
        }

        match unit.commit().await {
            Ok(()) => {
                info!(
                    id = %candidate.id,
                    amount = %candidate.amount,
                    "Inserted transaction"
                );
                Ok(Attempt::Done(CreateOutcome::Inserted {
                    insert_date_time: candidate.insert_date_time,
                }))
            }
            // Commit consumed the unit; the store already discarded its writes
            Err(e) if e.is_duplicate_key() => Ok(Attempt::LostRace),
            Err(e) => Err(e),
        }
    }

    /// Committed transaction with identifier `id`, if any.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredTransaction>, EngineError> {
        Ok(self.store.get_by_id(id).await?)
    }
}
