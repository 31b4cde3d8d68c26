use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::contracts::error::StorageError;

/// Name used when the caller does not pick a sequence.
pub const DEFAULT_SEQUENCE_NAME: &str = "default";

/// A named counter as persisted by the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    /// Most recently issued value, or the upper bound of the last issued range.
    pub last: i64,
}

impl Sequence {
    pub fn new(name: impl Into<String>, last: i64) -> Self {
        Self {
            name: name.into(),
            last,
        }
    }
}

/// How a transaction acquires the sequence row lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Block until the current holder commits or rolls back.
    #[default]
    Wait,
    /// Fail with `StorageError::LockUnavailable` instead of blocking.
    ///
    /// What counts as held depends on the store's lock granularity: RocksDB
    /// locks one sequence key, SQLite locks the whole database.
    NoWait,
}

impl LockMode {
    pub fn from_nowait(nowait: bool) -> Self {
        if nowait {
            LockMode::NoWait
        } else {
            LockMode::Wait
        }
    }
}

/// Transactional store holding sequence rows.
///
/// # Invariants
/// - At most one open transaction holds the write lock of a given row
/// - A transaction dropped without `commit` leaves every row unchanged
/// - `upsert_increment` is a single indivisible store-side operation
pub trait SequenceStore {
    /// Reports whether `upsert_increment` is available on this store.
    fn supports_atomic_upsert(&self) -> bool {
        false
    }

    /// Inserts `name` with `last = insert_value`, or adds `delta` to the
    /// existing row, and returns the resulting `last`.
    ///
    /// Fails with `StorageError::Overflow`, leaving the row unchanged, when
    /// the sum does not fit in an `i64`.
    fn upsert_increment(
        &self,
        _name: &str,
        _insert_value: i64,
        _delta: i64,
    ) -> Result<i64, StorageError> {
        Err(StorageError::Unsupported("atomic upsert"))
    }

    /// Opens a flat (non-nested) transaction.
    fn begin(&self, lock: LockMode) -> Result<Box<dyn SequenceTransaction + '_>, StorageError>;
}

/// An open transaction on a [`SequenceStore`].
pub trait SequenceTransaction {
    /// Fetches the row for `name` under a write lock, creating it with
    /// `last = default_last` when absent. The flag is true if the row was created.
    fn get_or_create_for_update(
        &mut self,
        name: &str,
        default_last: i64,
    ) -> Result<(Sequence, bool), StorageError>;

    /// Persists `sequence.last` for a row previously fetched in this transaction.
    fn save(&mut self, sequence: &Sequence) -> Result<(), StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

impl<S: SequenceStore + ?Sized> SequenceStore for &S {
    fn supports_atomic_upsert(&self) -> bool {
        (**self).supports_atomic_upsert()
    }

    fn upsert_increment(
        &self,
        name: &str,
        insert_value: i64,
        delta: i64,
    ) -> Result<i64, StorageError> {
        (**self).upsert_increment(name, insert_value, delta)
    }

    fn begin(&self, lock: LockMode) -> Result<Box<dyn SequenceTransaction + '_>, StorageError> {
        (**self).begin(lock)
    }
}

impl<S: SequenceStore + ?Sized> SequenceStore for Box<S> {
    fn supports_atomic_upsert(&self) -> bool {
        (**self).supports_atomic_upsert()
    }

    fn upsert_increment(
        &self,
        name: &str,
        insert_value: i64,
        delta: i64,
    ) -> Result<i64, StorageError> {
        (**self).upsert_increment(name, insert_value, delta)
    }

    fn begin(&self, lock: LockMode) -> Result<Box<dyn SequenceTransaction + '_>, StorageError> {
        (**self).begin(lock)
    }
}

impl<S: SequenceStore + ?Sized> SequenceStore for Arc<S> {
    fn supports_atomic_upsert(&self) -> bool {
        (**self).supports_atomic_upsert()
    }

    fn upsert_increment(
        &self,
        name: &str,
        insert_value: i64,
        delta: i64,
    ) -> Result<i64, StorageError> {
        (**self).upsert_increment(name, insert_value, delta)
    }

    fn begin(&self, lock: LockMode) -> Result<Box<dyn SequenceTransaction + '_>, StorageError> {
        (**self).begin(lock)
    }
}
