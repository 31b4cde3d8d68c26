use std::path::Path;
use std::time::Duration;

use rocksdb::{
    ErrorKind, Options, Transaction, TransactionDB, TransactionDBOptions, TransactionOptions,
    WriteOptions,
};

use crate::contracts::{LockMode, Sequence, SequenceStore, SequenceTransaction, StorageError};

/// Key prefix for sequence rows
const SEQUENCE_PREFIX: &str = "seq";

/// Configuration for [`RocksDbStore`].
#[derive(Debug, Clone, Default)]
pub struct RocksDbConfig {
    /// How long a blocking lock acquisition waits. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,
    /// fsync the WAL on every commit.
    pub sync_writes: bool,
}

impl RocksDbConfig {
    /// Creates a RocksDbConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SEQUENCES_ROCKSDB_LOCK_TIMEOUT_MS`: Blocking lock wait in ms (default: unbounded)
    /// - `SEQUENCES_ROCKSDB_SYNC`: `1`/`true` to fsync on commit (default: false)
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            lock_timeout: std::env::var("SEQUENCES_ROCKSDB_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .or(default.lock_timeout),
            sync_writes: std::env::var("SEQUENCES_ROCKSDB_SYNC")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(default.sync_writes),
        }
    }

    /// Lock timeout in RocksDB's encoding: milliseconds, negative for no timeout.
    fn lock_timeout_ms(&self) -> i64 {
        self.lock_timeout
            .map(|t| i64::try_from(t.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(-1)
    }
}

/// RocksDB-backed sequence store.
///
/// Uses a pessimistic `TransactionDB`: `get_for_update` locks the key
/// whether or not it exists, so two callers creating the same sequence
/// are serialized and the second one sees the first one's row.
pub struct RocksDbStore {
    db: TransactionDB,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Opens or creates a RocksDB store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_config(path, RocksDbConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: RocksDbConfig,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.lock_timeout_ms());

        let db = TransactionDB::open(&opts, &txn_db_opts, path).map_err(rocksdb_err)?;
        tracing::info!(path = %path.display(), "Opened RocksDB sequence store");

        Ok(Self { db, config })
    }

    pub fn config(&self) -> &RocksDbConfig {
        &self.config
    }

    /// Reads the last issued value of `name` without taking a lock.
    pub fn current(&self, name: &str) -> Result<Option<i64>, StorageError> {
        match self.db.get(Self::sequence_key(name)).map_err(rocksdb_err)? {
            Some(bytes) => Ok(Some(Self::deserialize_sequence(&bytes)?.last)),
            None => Ok(None),
        }
    }

    /// Creates a sequence key.
    fn sequence_key(name: &str) -> String {
        format!("{}:{}", SEQUENCE_PREFIX, name)
    }

    fn serialize_sequence(sequence: &Sequence) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(sequence).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn deserialize_sequence(bytes: &[u8]) -> Result<Sequence, StorageError> {
        bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

impl SequenceStore for RocksDbStore {
    fn begin(&self, lock: LockMode) -> Result<Box<dyn SequenceTransaction + '_>, StorageError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);

        let mut txn_opts = TransactionOptions::default();
        // -1 defers to the database-wide timeout set at open.
        txn_opts.set_lock_timeout(match lock {
            LockMode::Wait => -1,
            LockMode::NoWait => 0,
        });
        txn_opts.set_deadlock_detect(true);

        Ok(Box::new(RocksDbTransaction {
            txn: self.db.transaction_opt(&write_opts, &txn_opts),
            lock,
        }))
    }
}

/// Open pessimistic transaction. Rolls back on drop.
struct RocksDbTransaction<'db> {
    txn: Transaction<'db, TransactionDB>,
    lock: LockMode,
}

impl SequenceTransaction for RocksDbTransaction<'_> {
    fn get_or_create_for_update(
        &mut self,
        name: &str,
        default_last: i64,
    ) -> Result<(Sequence, bool), StorageError> {
        let key = RocksDbStore::sequence_key(name);
        let existing = self
            .txn
            .get_for_update(key.as_bytes(), true)
            .map_err(|e| classify(e, self.lock))?;

        match existing {
            Some(bytes) => Ok((RocksDbStore::deserialize_sequence(&bytes)?, false)),
            None => {
                let sequence = Sequence::new(name, default_last);
                self.txn
                    .put(key.as_bytes(), RocksDbStore::serialize_sequence(&sequence)?)
                    .map_err(rocksdb_err)?;
                Ok((sequence, true))
            }
        }
    }

    fn save(&mut self, sequence: &Sequence) -> Result<(), StorageError> {
        let key = RocksDbStore::sequence_key(&sequence.name);
        self.txn
            .put(key.as_bytes(), RocksDbStore::serialize_sequence(sequence)?)
            .map_err(rocksdb_err)
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.txn
            .commit()
            .map_err(|e| classify(e, LockMode::Wait))
    }
}

fn rocksdb_err(err: rocksdb::Error) -> StorageError {
    StorageError::RocksDb(err.into_string())
}

/// Maps lock timeouts and deadlocks according to how the lock was requested.
fn classify(err: rocksdb::Error, lock: LockMode) -> StorageError {
    match (err.kind(), lock) {
        (ErrorKind::TimedOut, LockMode::NoWait) => StorageError::LockUnavailable,
        (ErrorKind::TimedOut | ErrorKind::Busy | ErrorKind::TryAgain, _) => {
            StorageError::Busy(err.into_string())
        }
        _ => rocksdb_err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksDbStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn has_no_native_upsert() {
        let (store, _dir) = create_test_store();
        assert!(!store.supports_atomic_upsert());
        assert!(matches!(
            store.upsert_increment("s", 1, 1),
            Err(StorageError::Unsupported(_))
        ));
    }

    #[test]
    fn sequence_key_format() {
        assert_eq!(RocksDbStore::sequence_key("invoices"), "seq:invoices");
    }

    #[test]
    fn get_or_create_then_save() {
        let (store, _dir) = create_test_store();

        let mut txn = store.begin(LockMode::Wait).unwrap();
        let (mut sequence, created) = txn.get_or_create_for_update("s", 10).unwrap();
        assert!(created);
        assert_eq!(sequence.last, 10);
        sequence.last = 11;
        txn.save(&sequence).unwrap();
        txn.commit().unwrap();

        assert_eq!(store.current("s").unwrap(), Some(11));

        let mut txn = store.begin(LockMode::Wait).unwrap();
        let (sequence, created) = txn.get_or_create_for_update("s", 10).unwrap();
        assert!(!created);
        assert_eq!(sequence, Sequence::new("s", 11));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let (store, _dir) = create_test_store();
        {
            let mut txn = store.begin(LockMode::Wait).unwrap();
            txn.get_or_create_for_update("s", 1).unwrap();
        }
        assert_eq!(store.current("s").unwrap(), None);
    }

    #[test]
    fn nowait_on_locked_key_is_lock_unavailable() {
        let (store, _dir) = create_test_store();

        let mut holder = store.begin(LockMode::Wait).unwrap();
        holder.get_or_create_for_update("s", 1).unwrap();

        let mut other = store.begin(LockMode::NoWait).unwrap();
        assert!(matches!(
            other.get_or_create_for_update("s", 1),
            Err(StorageError::LockUnavailable)
        ));

        // Other keys are not affected
        let mut unrelated = store.begin(LockMode::NoWait).unwrap();
        assert!(unrelated.get_or_create_for_update("t", 1).is_ok());
    }

    #[test]
    fn bounded_wait_times_out_as_busy() {
        let dir = TempDir::new().unwrap();
        let store = RocksDbStore::open_with_config(
            dir.path(),
            RocksDbConfig {
                lock_timeout: Some(Duration::from_millis(50)),
                sync_writes: false,
            },
        )
        .unwrap();

        let mut holder = store.begin(LockMode::Wait).unwrap();
        holder.get_or_create_for_update("s", 1).unwrap();

        let mut other = store.begin(LockMode::Wait).unwrap();
        assert!(matches!(
            other.get_or_create_for_update("s", 1),
            Err(StorageError::Busy(_))
        ));
    }

    #[test]
    fn waiter_sees_row_created_by_holder() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);

        let mut holder = store.begin(LockMode::Wait).unwrap();
        holder.get_or_create_for_update("s", 5).unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut txn = store.begin(LockMode::Wait).unwrap();
                let (sequence, created) = txn.get_or_create_for_update("s", 99).unwrap();
                txn.commit().unwrap();
                (sequence.last, created)
            })
        };

        thread::sleep(Duration::from_millis(100));
        holder.commit().unwrap();

        assert_eq!(waiter.join().unwrap(), (5, false));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = RocksDbStore::open(dir.path()).unwrap();
            let mut txn = store.begin(LockMode::Wait).unwrap();
            txn.get_or_create_for_update("s", 7).unwrap();
            txn.commit().unwrap();
        }
        let store = RocksDbStore::open(dir.path()).unwrap();
        assert_eq!(store.current("s").unwrap(), Some(7));
    }

    #[test]
    fn test_from_env() {
        std::env::remove_var("SEQUENCES_ROCKSDB_LOCK_TIMEOUT_MS");
        std::env::remove_var("SEQUENCES_ROCKSDB_SYNC");

        let config = RocksDbConfig::from_env();
        assert_eq!(config.lock_timeout, None);
        assert_eq!(config.lock_timeout_ms(), -1);
        assert!(!config.sync_writes);

        std::env::set_var("SEQUENCES_ROCKSDB_LOCK_TIMEOUT_MS", "1500");
        std::env::set_var("SEQUENCES_ROCKSDB_SYNC", "true");

        let config = RocksDbConfig::from_env();
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.lock_timeout_ms(), 1500);
        assert!(config.sync_writes);

        std::env::set_var("SEQUENCES_ROCKSDB_LOCK_TIMEOUT_MS", "-5");
        assert_eq!(RocksDbConfig::from_env().lock_timeout, None);

        std::env::remove_var("SEQUENCES_ROCKSDB_LOCK_TIMEOUT_MS");
        std::env::remove_var("SEQUENCES_ROCKSDB_SYNC");
    }
}
