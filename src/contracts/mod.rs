pub mod error;
pub mod store;

pub use error::{SequenceError, StorageError};
pub use store::{LockMode, Sequence, SequenceStore, SequenceTransaction, DEFAULT_SEQUENCE_NAME};
