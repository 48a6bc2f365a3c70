//! In-process record store
//!
//! Holds the transaction map and the capacity counter behind one mutex,
//! taken around each individual read or read-modify-write. Units of work that
//! reserve capacity also take the store's writer slot and keep it until they
//! commit or roll back, the same way a SQL store holds the counter row lock
//! for the rest of the transaction. Inserts are staged inside the unit and
//! published at commit, where uniqueness is checked again.
//!
//! Contents are lost when the process exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

use super::{RecordStore, StoreError, UnitOfWork};
use crate::schema::StoredTransaction;

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<Uuid, StoredTransaction>,
    count: u32,
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // A poisoned lock only means another handler panicked mid-read; the
    // map and counter are only mutated together inside `commit`.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`RecordStore`]. Cloning shares the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records
    pub fn len(&self) -> usize {
        lock_state(&self.state).records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn provision(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn begin_unit_of_work(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemoryUnit {
            state: Arc::clone(&self.state),
            writer: Arc::clone(&self.writer),
            writer_slot: None,
            reserved: 0,
            staged: Vec::new(),
        }))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredTransaction>, StoreError> {
        Ok(lock_state(&self.state).records.get(&id).cloned())
    }

    async fn admitted_count(&self) -> Result<u32, StoreError> {
        Ok(lock_state(&self.state).count)
    }
}

struct MemoryUnit {
    state: Arc<Mutex<MemoryState>>,
    writer: Arc<tokio::sync::Mutex<()>>,
    writer_slot: Option<OwnedMutexGuard<()>>,
    reserved: u32,
    staged: Vec<StoredTransaction>,
}

impl MemoryUnit {
    async fn acquire_writer_slot(&mut self) {
        if self.writer_slot.is_none() {
            self.writer_slot = Some(Arc::clone(&self.writer).lock_owned().await);
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn get_by_id(&mut self, id: Uuid) -> Result<Option<StoredTransaction>, StoreError> {
        if let Some(staged) = self.staged.iter().find(|r| r.id == id) {
            return Ok(Some(staged.clone()));
        }
        Ok(lock_state(&self.state).records.get(&id).cloned())
    }

    async fn increment_if_below(&mut self, max: u32) -> Result<bool, StoreError> {
        self.acquire_writer_slot().await;
        let state = lock_state(&self.state);
        if state.count.saturating_add(self.reserved) < max {
            self.reserved += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn insert(&mut self, record: &StoredTransaction) -> Result<(), StoreError> {
        let exists = lock_state(&self.state).records.contains_key(&record.id)
            || self.staged.iter().any(|r| r.id == record.id);
        if exists {
            return Err(StoreError::DuplicateKey { id: record.id });
        }
        self.staged.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = lock_state(&self.state);
        if let Some(dup) = self.staged.iter().find(|r| state.records.contains_key(&r.id)) {
            return Err(StoreError::DuplicateKey { id: dup.id });
        }
        state.count += self.reserved;
        for record in &self.staged {
            state.records.insert(record.id, record.clone());
        }
        debug!(
            inserted = self.staged.len(),
            count = state.count,
            "Committed in-memory unit of work"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        debug!(
            discarded = self.staged.len(),
            "Rolled back in-memory unit of work"
        );
        Ok(())
    }
}
