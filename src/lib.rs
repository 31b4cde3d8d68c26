//! Named integer sequences allocated through a transactional store.
//!
//! Values are handed out by [`allocator::next_value`] and ranges by
//! [`allocator::next_values`]. Concurrency control is delegated to the
//! store: a single-statement upsert where the store supports one, a
//! row lock followed by read-modify-write otherwise.

pub mod allocator;
pub mod contracts;
pub mod storage;

pub use allocator::{
    next_value, next_values, NextValue, NextValues, SequenceAllocator, Strategy, MAX_RANGE_SIZE,
};
pub use contracts::{SequenceError, StorageError};
