use std::path::Path;
use std::time::Duration;

use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::contracts::{LockMode, Sequence, SequenceStore, SequenceTransaction, StorageError};

/// First SQLite release supporting `RETURNING` on an upsert (3.35.0).
const UPSERT_RETURNING_MIN_VERSION: i32 = 3_035_000;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sequences_sequence (
    name TEXT PRIMARY KEY,
    last INTEGER NOT NULL
)";

// The WHERE guard leaves the row untouched instead of letting SQLite
// promote an overflowing sum to REAL; no row is returned in that case.
const UPSERT_QUERY: &str = "
    INSERT INTO sequences_sequence (name, last)
         VALUES (?1, ?2)
    ON CONFLICT (name)
  DO UPDATE SET last = sequences_sequence.last + ?3
          WHERE sequences_sequence.last <= ?4
      RETURNING last";

const SELECT_LAST: &str = "SELECT last FROM sequences_sequence WHERE name = ?1";
const INSERT_SEQUENCE: &str = "INSERT INTO sequences_sequence (name, last) VALUES (?1, ?2)";
const UPDATE_LAST: &str = "UPDATE sequences_sequence SET last = ?2 WHERE name = ?1";

/// Configuration for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// How long a blocking lock acquisition waits before failing as busy.
    pub busy_timeout: Duration,
    /// Value for `PRAGMA synchronous`.
    pub synchronous: String,
    /// Allow the single-statement upsert when the linked SQLite supports it.
    pub atomic_upsert: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            synchronous: "NORMAL".into(),
            atomic_upsert: true,
        }
    }
}

impl SqliteConfig {
    /// Creates a SqliteConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SEQUENCES_SQLITE_BUSY_TIMEOUT_MS`: Blocking lock wait in ms (default: 5000)
    /// - `SEQUENCES_SQLITE_SYNCHRONOUS`: `PRAGMA synchronous` value (default: NORMAL)
    /// - `SEQUENCES_ATOMIC_UPSERT`: `0`/`false` forces the locked path (default: true)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            busy_timeout: std::env::var("SEQUENCES_SQLITE_BUSY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(default.busy_timeout),
            synchronous: std::env::var("SEQUENCES_SQLITE_SYNCHRONOUS")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.synchronous),
            atomic_upsert: std::env::var("SEQUENCES_ATOMIC_UPSERT")
                .map(|v| !(v == "0" || v.eq_ignore_ascii_case("false")))
                .unwrap_or(default.atomic_upsert),
        }
    }
}

/// SQLite-backed sequence store.
///
/// Owns one connection, so a store is used from one thread at a time.
/// Concurrent callers open their own store on the same database file.
/// Locked allocations run under `BEGIN IMMEDIATE`, which holds the
/// database write lock until commit.
///
/// The lock covers every sequence in the database, not one row. While any
/// connection holds a locked transaction, a [`LockMode::NoWait`] call fails
/// with `LockUnavailable` even for a different sequence name, and a
/// [`LockMode::Wait`] call queues behind it for up to `busy_timeout`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    config: SqliteConfig,
}

impl SqliteStore {
    /// Opens or creates a database file with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: SqliteConfig,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(sqlite_err)?;
        conn.busy_timeout(config.busy_timeout).map_err(sqlite_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sqlite_err)?;

        let store = Self::init(conn, config)?;
        tracing::info!(
            path = %path.display(),
            atomic_upsert = store.supports_atomic_upsert(),
            "Opened SQLite sequence store"
        );
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::open_in_memory_with_config(SqliteConfig::default())
    }

    pub fn open_in_memory_with_config(config: SqliteConfig) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        conn.busy_timeout(config.busy_timeout).map_err(sqlite_err)?;
        Self::init(conn, config)
    }

    fn init(conn: Connection, config: SqliteConfig) -> Result<Self, StorageError> {
        conn.pragma_update(None, "synchronous", &config.synchronous)
            .map_err(sqlite_err)?;
        conn.execute(CREATE_TABLE, []).map_err(sqlite_err)?;
        Ok(Self { conn, config })
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Reads the last issued value of `name` without taking a lock.
    pub fn current(&self, name: &str) -> Result<Option<i64>, StorageError> {
        self.conn
            .query_row(SELECT_LAST, params![name], |row| row.get(0))
            .optional()
            .map_err(sqlite_err)
    }
}

impl SequenceStore for SqliteStore {
    fn supports_atomic_upsert(&self) -> bool {
        self.config.atomic_upsert && rusqlite::version_number() >= UPSERT_RETURNING_MIN_VERSION
    }

    fn upsert_increment(
        &self,
        name: &str,
        insert_value: i64,
        delta: i64,
    ) -> Result<i64, StorageError> {
        let ceiling = i64::MAX.saturating_sub(delta);
        self.conn
            .query_row(
                UPSERT_QUERY,
                params![name, insert_value, delta, ceiling],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| classify(e, LockMode::Wait))?
            .ok_or(StorageError::Overflow)
    }

    fn begin(&self, lock: LockMode) -> Result<Box<dyn SequenceTransaction + '_>, StorageError> {
        // The busy handler only matters while BEGIN IMMEDIATE waits for the
        // write lock; once held, nothing else in the transaction blocks.
        if lock == LockMode::NoWait {
            self.conn.busy_timeout(Duration::ZERO).map_err(sqlite_err)?;
        }
        let txn = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate);
        if lock == LockMode::NoWait {
            self.conn
                .busy_timeout(self.config.busy_timeout)
                .map_err(sqlite_err)?;
        }

        let txn = txn.map_err(|e| classify(e, lock))?;
        Ok(Box::new(SqliteTransaction { txn }))
    }
}

/// Open `BEGIN IMMEDIATE` transaction. Rolls back on drop.
struct SqliteTransaction<'conn> {
    txn: Transaction<'conn>,
}

impl SequenceTransaction for SqliteTransaction<'_> {
    fn get_or_create_for_update(
        &mut self,
        name: &str,
        default_last: i64,
    ) -> Result<(Sequence, bool), StorageError> {
        let existing: Option<i64> = self
            .txn
            .query_row(SELECT_LAST, params![name], |row| row.get(0))
            .optional()
            .map_err(sqlite_err)?;

        match existing {
            Some(last) => Ok((Sequence::new(name, last), false)),
            None => {
                self.txn
                    .execute(INSERT_SEQUENCE, params![name, default_last])
                    .map_err(sqlite_err)?;
                Ok((Sequence::new(name, default_last), true))
            }
        }
    }

    fn save(&mut self, sequence: &Sequence) -> Result<(), StorageError> {
        self.txn
            .execute(UPDATE_LAST, params![sequence.name, sequence.last])
            .map_err(sqlite_err)?;
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.txn.commit().map_err(|e| classify(e, LockMode::Wait))
    }
}

fn sqlite_err(err: rusqlite::Error) -> StorageError {
    StorageError::Sqlite(err.to_string())
}

/// Maps busy/locked results to lock errors according to how the lock was requested.
fn classify(err: rusqlite::Error, lock: LockMode) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => match lock {
            LockMode::NoWait => StorageError::LockUnavailable,
            LockMode::Wait => StorageError::Busy(err.to_string()),
        },
        _ => sqlite_err(err),
    }
}
