//! SQLite-backed record store
//!
//! Layout:
//!
//! ```text
//! transactions (id TEXT PRIMARY KEY, transaction_date TEXT, amount TEXT, insert_date_time TEXT)
//! capacity     (id INTEGER PRIMARY KEY, count INTEGER)   -- single row, id = 1
//! ```
//!
//! Amounts are stored as decimal text and instants as RFC 3339 UTC text, so
//! both round-trip exactly.
//!
//! Every unit of work owns its own connection and starts with
//! `BEGIN IMMEDIATE`, which takes the database write lock up front; SQLite's
//! busy timeout bounds how long a unit waits for it. All SQLite calls run on
//! tokio's blocking pool. If the caller drops a unit mid-flight, its
//! connection is closed and SQLite rolls the open transaction back.
//!
//! Open units are capped (see [`DEFAULT_MAX_OPEN_UNITS`]). Callers beyond the
//! cap wait on an async semaphore, not in SQLite's busy handler, so the
//! blocking pool always has threads for the unit holding the write lock.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, ffi, params};
use rust_decimal::Decimal;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use uuid::Uuid;

use super::{RecordStore, StoreError, UnitOfWork};
use crate::schema::StoredTransaction;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS transactions (
  id TEXT PRIMARY KEY,
  transaction_date TEXT NOT NULL,
  amount TEXT NOT NULL,
  insert_date_time TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS capacity (
  id INTEGER PRIMARY KEY,
  count INTEGER NOT NULL
);

INSERT INTO capacity (id, count)
VALUES (1, 0)
ON CONFLICT (id) DO NOTHING;
";

const SELECT_BY_ID_SQL: &str = "
SELECT id, transaction_date, amount, insert_date_time
FROM transactions
WHERE id = ?1;
";

const INSERT_SQL: &str = "
INSERT INTO transactions (id, transaction_date, amount, insert_date_time)
VALUES (?1, ?2, ?3, ?4);
";

const RESERVE_SQL: &str = "
UPDATE capacity
SET count = count + 1
WHERE id = 1 AND count < ?1;
";

/// Default time a unit of work waits for the database write lock.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default number of units of work that may be open at once.
pub const DEFAULT_MAX_OPEN_UNITS: usize = 16;

/// Durable [`RecordStore`] backed by a SQLite database file.
///
/// Clones share the open-unit limit.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    open_units: Arc<Semaphore>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn with_busy_timeout(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            open_units: Arc::new(Semaphore::new(DEFAULT_MAX_OPEN_UNITS)),
        }
    }

    /// Replace the open-unit limit (at least one).
    pub fn with_max_open_units(mut self, max: usize) -> Self {
        self.open_units = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, Duration) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || op(&path, busy_timeout))
            .await
            .map_err(|e| StoreError::Worker {
                message: e.to_string(),
            })?
    }
}

fn db_err(path: &Path) -> impl FnOnce(rusqlite::Error) -> StoreError + '_ {
    move |source| StoreError::Database {
        path: path.to_path_buf(),
        source,
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, StoreError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(db_err(path))?;
    conn.busy_timeout(busy_timeout).map_err(db_err(path))?;
    Ok(conn)
}

fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_instant(id: &str, column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: format!("{column}: {e}"),
        })
}

/// Map an insert failure; only a primary-key violation is a duplicate.
fn insert_error(path: &Path, id: Uuid, source: rusqlite::Error) -> StoreError {
    match source {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            StoreError::DuplicateKey { id }
        }
        source => db_err(path)(source),
    }
}

type RawRow = (String, String, String, String);

fn decode_row(raw: RawRow) -> Result<StoredTransaction, StoreError> {
    let (id_raw, date_raw, amount_raw, inserted_raw) = raw;
    let id = Uuid::parse_str(&id_raw).map_err(|e| StoreError::Corrupt {
        id: id_raw.clone(),
        message: format!("id: {e}"),
    })?;
    let amount = Decimal::from_str(&amount_raw).map_err(|e| StoreError::Corrupt {
        id: id_raw.clone(),
        message: format!("amount: {e}"),
    })?;
    Ok(StoredTransaction {
        id,
        transaction_date: parse_instant(&id_raw, "transaction_date", &date_raw)?,
        amount,
        insert_date_time: parse_instant(&id_raw, "insert_date_time", &inserted_raw)?,
    })
}

fn select_by_id(
    conn: &Connection,
    path: &Path,
    id: Uuid,
) -> Result<Option<StoredTransaction>, StoreError> {
    let raw: Option<RawRow> = conn
        .query_row(SELECT_BY_ID_SQL, params![id.to_string()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .optional()
        .map_err(db_err(path))?;
    raw.map(decode_row).transpose()
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn provision(&self) -> Result<(), StoreError> {
        self.run_blocking(|path, busy_timeout| {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            let conn = open_connection(path, busy_timeout)?;
            let journal_mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .map_err(db_err(path))?;
            conn.execute_batch(SCHEMA_SQL).map_err(db_err(path))?;
            debug!(%journal_mode, "Provisioned transaction store at {}", path.display());
            Ok(())
        })
        .await
    }

    async fn begin_unit_of_work(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let permit = Arc::clone(&self.open_units)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::Worker {
                message: e.to_string(),
            })?;
        let conn = self
            .run_blocking(|path, busy_timeout| {
                let conn = open_connection(path, busy_timeout)?;
                conn.execute_batch("BEGIN IMMEDIATE;")
                    .map_err(db_err(path))?;
                Ok(conn)
            })
            .await?;
        Ok(Box::new(SqliteUnit {
            conn: Some(conn),
            path: self.path.clone(),
            finished: false,
            _permit: permit,
        }))
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<StoredTransaction>, StoreError> {
        self.run_blocking(move |path, busy_timeout| {
            let conn = open_connection(path, busy_timeout)?;
            select_by_id(&conn, path, id)
        })
        .await
    }

    async fn admitted_count(&self) -> Result<u32, StoreError> {
        self.run_blocking(|path, busy_timeout| {
            let conn = open_connection(path, busy_timeout)?;
            let count: Option<u32> = conn
                .query_row("SELECT count FROM capacity WHERE id = 1;", [], |row| {
                    row.get(0)
                })
                .optional()
                .map_err(db_err(path))?;
            count.ok_or(StoreError::NotProvisioned)
        })
        .await
    }
}

struct SqliteUnit {
    conn: Option<Connection>,
    path: PathBuf,
    finished: bool,
    // Released when the unit is dropped, after its connection
    _permit: OwnedSemaphorePermit,
}

impl SqliteUnit {
    /// Run `op` on the blocking pool with this unit's connection.
    ///
    /// The connection travels into the worker and back; if this future is
    /// dropped first, the worker drops the connection and SQLite rolls back.
    async fn with_conn<T, F>(&mut self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &Path) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.take().ok_or(StoreError::UnitClosed)?;
        let path = self.path.clone();
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = op(&conn, &path);
            (conn, result)
        })
        .await
        .map_err(|e| StoreError::Worker {
            message: e.to_string(),
        })?;
        self.conn = Some(conn);
        result
    }

    async fn finish(mut self: Box<Self>, statement: &'static str) -> Result<(), StoreError> {
        self.with_conn(move |conn, path| conn.execute_batch(statement).map_err(db_err(path)))
            .await?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteUnit {
    fn drop(&mut self) {
        if !self.finished && self.conn.is_some() {
            debug!("Unit of work dropped before commit; SQLite will roll it back");
        }
    }
}

#[async_trait]
impl UnitOfWork for SqliteUnit {
    async fn get_by_id(&mut self, id: Uuid) -> Result<Option<StoredTransaction>, StoreError> {
        self.with_conn(move |conn, path| select_by_id(conn, path, id))
            .await
    }

    async fn increment_if_below(&mut self, max: u32) -> Result<bool, StoreError> {
        self.with_conn(move |conn, path| {
            let rows = conn.execute(RESERVE_SQL, params![max]).map_err(db_err(path))?;
            Ok(rows > 0)
        })
        .await
    }

    async fn insert(&mut self, record: &StoredTransaction) -> Result<(), StoreError> {
        let record = record.clone();
        self.with_conn(move |conn, path| {
            let result = conn.execute(
                INSERT_SQL,
                params![
                    record.id.to_string(),
                    format_instant(&record.transaction_date),
                    record.amount.to_string(),
                    format_instant(&record.insert_date_time),
                ],
            );
            result
                .map(|_| ())
                .map_err(|source| insert_error(path, record.id, source))
        })
        .await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.finish("COMMIT;").await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.finish("ROLLBACK;").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn record(n: u128, amount: Decimal) -> StoredTransaction {
        StoredTransaction {
            id: Uuid::from_u128(n),
            transaction_date: Utc
                .with_ymd_and_hms(2026, 1, 15, 9, 30, 0)
                .unwrap()
                + chrono::Duration::nanoseconds(123_456_789),
            amount,
            insert_date_time: Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
        }
    }

    async fn provisioned(dir: &TempDir) -> SqliteStore {
        let store = SqliteStore::new(dir.path().join("intake.db"));
        store.provision().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;
        store.provision().await.unwrap();
        assert_eq!(store.admitted_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_provision_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("nested").join("intake.db"));
        store.provision().await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_unprovisioned_counter_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("empty.db"));
        let err = store.admitted_count().await.unwrap_err();
        assert!(matches!(err, StoreError::Database { .. }));
    }

    #[tokio::test]
    async fn test_committed_record_round_trips_exactly() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;
        let original = record(1, Decimal::new(1000, 2));

        let mut unit = store.begin_unit_of_work().await.unwrap();
        assert!(unit.increment_if_below(100).await.unwrap());
        unit.insert(&original).await.unwrap();
        unit.commit().await.unwrap();

        let loaded = store.get_by_id(original.id).await.unwrap().unwrap();
        assert_eq!(loaded, original);
        assert_eq!(loaded.amount.to_string(), "10.00");
        assert_eq!(store.admitted_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;

        let mut unit = store.begin_unit_of_work().await.unwrap();
        assert!(unit.increment_if_below(100).await.unwrap());
        unit.insert(&record(2, Decimal::ONE)).await.unwrap();
        unit.rollback().await.unwrap();

        assert!(store.get_by_id(Uuid::from_u128(2)).await.unwrap().is_none());
        assert_eq!(store.admitted_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back_and_releases_lock() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;
        {
            let mut unit = store.begin_unit_of_work().await.unwrap();
            assert!(unit.increment_if_below(100).await.unwrap());
            unit.insert(&record(3, Decimal::ONE)).await.unwrap();
        }
        assert_eq!(store.admitted_count().await.unwrap(), 0);

        let mut unit = store.begin_unit_of_work().await.unwrap();
        assert!(unit.increment_if_below(100).await.unwrap());
        unit.commit().await.unwrap();
        assert_eq!(store.admitted_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unit_reads_its_own_writes() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;
        let mut unit = store.begin_unit_of_work().await.unwrap();
        unit.insert(&record(4, Decimal::TEN)).await.unwrap();
        assert!(unit.get_by_id(Uuid::from_u128(4)).await.unwrap().is_some());
        unit.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_insert_maps_to_duplicate_key() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;

        let mut unit = store.begin_unit_of_work().await.unwrap();
        unit.insert(&record(5, Decimal::ONE)).await.unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.begin_unit_of_work().await.unwrap();
        let err = unit.insert(&record(5, Decimal::TWO)).await.unwrap_err();
        assert!(err.is_duplicate_key(), "unexpected error: {err}");
        unit.rollback().await.unwrap();

        let stored = store.get_by_id(Uuid::from_u128(5)).await.unwrap().unwrap();
        assert_eq!(stored.amount, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_increment_stops_at_max() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;
        for _ in 0..3 {
            let mut unit = store.begin_unit_of_work().await.unwrap();
            assert!(unit.increment_if_below(3).await.unwrap());
            unit.commit().await.unwrap();
        }
        let mut unit = store.begin_unit_of_work().await.unwrap();
        assert!(!unit.increment_if_below(3).await.unwrap());
        unit.rollback().await.unwrap();
        assert_eq!(store.admitted_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_amount_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = provisioned(&dir).await;
        let conn = Connection::open(store.path()).unwrap();
        conn.execute(
            INSERT_SQL,
            params![
                Uuid::from_u128(6).to_string(),
                "2026-01-01T00:00:00Z",
                "not-a-number",
                "2026-01-01T00:00:00Z"
            ],
        )
        .unwrap();
        drop(conn);

        let err = store.get_by_id(Uuid::from_u128(6)).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_only_primary_key_violation_is_duplicate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("constraints.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(SCHEMA_SQL).unwrap();
        let id = Uuid::from_u128(8);

        let not_null = conn
            .execute(
                "INSERT INTO transactions (id, transaction_date, amount, insert_date_time)
                 VALUES (?1, NULL, '1', '2026-01-01T00:00:00Z');",
                params![id.to_string()],
            )
            .unwrap_err();
        let mapped = insert_error(&path, id, not_null);
        assert!(matches!(mapped, StoreError::Database { .. }), "got {mapped}");

        let row = params![
            id.to_string(),
            "2026-01-01T00:00:00Z",
            "1",
            "2026-01-01T00:00:00Z"
        ];
        conn.execute(INSERT_SQL, row).unwrap();
        let primary_key = conn.execute(INSERT_SQL, row).unwrap_err();
        assert!(insert_error(&path, id, primary_key).is_duplicate_key());
    }

    #[tokio::test]
    async fn test_open_units_wait_for_a_free_slot() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("intake.db")).with_max_open_units(1);
        store.provision().await.unwrap();

        let first = store.begin_unit_of_work().await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(200), store.begin_unit_of_work()).await;
        assert!(blocked.is_err(), "second unit should wait for the first");

        first.rollback().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), store.begin_unit_of_work())
            .await
            .expect("slot should be released by rollback")
            .unwrap();
        second.rollback().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_many_concurrent_units_all_complete() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("intake.db")).with_max_open_units(2);
        store.provision().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut unit = store.begin_unit_of_work().await.unwrap();
                assert!(unit.increment_if_below(100).await.unwrap());
                unit.commit().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.admitted_count().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let original = record(7, Decimal::new(5, 1));
        {
            let store = provisioned(&dir).await;
            let mut unit = store.begin_unit_of_work().await.unwrap();
            unit.increment_if_below(100).await.unwrap();
            unit.insert(&original).await.unwrap();
            unit.commit().await.unwrap();
        }
        let reopened = provisioned(&dir).await;
        assert_eq!(
            reopened.get_by_id(original.id).await.unwrap(),
            Some(original)
        );
        assert_eq!(reopened.admitted_count().await.unwrap(), 1);
    }
}
