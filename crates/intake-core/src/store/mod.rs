//! Record store abstraction
//!
//! The insert engine talks to storage only through [`RecordStore`] and the
//! [`UnitOfWork`] it hands out. A unit of work is an all-or-nothing sequence
//! of reads and writes:
//!
//! - writes become durable and visible only after [`UnitOfWork::commit`]
//! - [`UnitOfWork::rollback`], or simply dropping the unit (for example when
//!   a request is cancelled mid-flight), discards every write, including the
//!   capacity reservation
//! - [`UnitOfWork::insert`] reports [`StoreError::DuplicateKey`] when the
//!   identifier is already stored
//!
//! Two implementations are provided:
//!
//! - [`SqliteStore`]: durable, one connection per unit of work
//! - [`MemoryStore`]: in-process, lost on restart

pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::schema::StoredTransaction;

/// Durable keyed storage for transactions plus the capacity counter.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the transaction table and the counter (at zero) if absent.
    ///
    /// Idempotent; called once at startup.
    async fn provision(&self) -> Result<(), StoreError>;

    /// Open a new unit of work.
    async fn begin_unit_of_work(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Point lookup against committed state, outside any unit of work.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredTransaction>, StoreError>;

    /// Current value of the capacity counter (committed state).
    async fn admitted_count(&self) -> Result<u32, StoreError>;
}

/// An open, isolated unit of work against a [`RecordStore`].
#[async_trait]
pub trait UnitOfWork: Send {
    /// Point lookup that sees this unit's own writes.
    async fn get_by_id(&mut self, id: Uuid) -> Result<Option<StoredTransaction>, StoreError>;

    /// Atomically increment the capacity counter if it is below `max`.
    ///
    /// Returns whether the increment happened. Check and increment are a
    /// single operation.
    async fn increment_if_below(&mut self, max: u32) -> Result<bool, StoreError>;

    /// Stage a new record.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if the identifier already exists.
    async fn insert(&mut self, record: &StoredTransaction) -> Result<(), StoreError>;

    /// Make every write of this unit durable and visible.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every write of this unit.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
