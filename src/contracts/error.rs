use thiserror::Error;

/// Errors raised by a backing store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("RocksDB error: {0}")]
    RocksDb(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The row lock is held by another transaction and the caller asked not to wait.
    #[error("Lock not available")]
    LockUnavailable,

    /// Deadlock victim, lock wait timeout or a busy database.
    #[error("Store busy: {0}")]
    Busy(String),

    /// The stored value cannot be advanced without leaving the `i64` range.
    #[error("Stored value out of range")]
    Overflow,

    #[error("Operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

#[derive(Error, Debug)]
pub enum SequenceError {
    #[error("reset_value ({reset}) must be greater than initial_value ({initial})")]
    InvalidResetValue { initial: i64, reset: i64 },

    #[error("Invalid range size: {0}")]
    InvalidRangeSize(u64),

    #[error("Sequence overflow")]
    Overflow,

    #[error("Lock not available for sequence {0}")]
    LockUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SequenceError {
    /// Attaches the sequence name to lock failures; other errors pass through.
    pub(crate) fn from_storage(name: &str, err: StorageError) -> Self {
        match err {
            StorageError::LockUnavailable => SequenceError::LockUnavailable(name.to_string()),
            StorageError::Overflow => SequenceError::Overflow,
            other => SequenceError::Storage(other),
        }
    }

    /// Returns true if the call failed because `nowait` was set and the row was locked.
    pub fn is_lock_unavailable(&self) -> bool {
        matches!(self, SequenceError::LockUnavailable(_))
    }

    /// Returns true if retrying the same call may succeed.
    ///
    /// The allocator never retries on its own; callers use this to decide.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SequenceError::LockUnavailable(_) | SequenceError::Storage(StorageError::Busy(_))
        )
    }
}
