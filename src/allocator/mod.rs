mod request;
mod strategy;

pub use request::{NextValue, NextValues, MAX_RANGE_SIZE};
pub use strategy::{select_range_strategy, select_strategy, Strategy};

use crate::contracts::{SequenceError, SequenceStore};

/// Returns the next value of a sequence, creating it at `initial_value` on first use.
///
/// Values for one name are strictly increasing by one in commit order,
/// except right after a reset wraps back to `initial_value`.
pub fn next_value<S: SequenceStore + ?Sized>(
    store: &S,
    request: &NextValue,
) -> Result<i64, SequenceError> {
    request.validate()?;

    let strategy = select_strategy(store, request);
    tracing::debug!(sequence = %request.name, ?strategy, "Allocating next value");

    match strategy {
        Strategy::AtomicUpsert => upsert_next(store, request),
        Strategy::Locked => locked_next(store, request),
    }
}

/// Reserves `request.size` contiguous values and returns them in ascending order.
///
/// `request.size` must be between 1 and [`MAX_RANGE_SIZE`].
///
/// A sequence created by this call is pre-advanced to
/// `initial_value + size - 1`, so its first range starts at `initial_value`.
pub fn next_values<S: SequenceStore + ?Sized>(
    store: &S,
    request: &NextValues,
) -> Result<Vec<i64>, SequenceError> {
    let size = request.delta()?;

    let strategy = select_range_strategy(store, request);
    tracing::debug!(sequence = %request.name, size, ?strategy, "Allocating range");

    locked_next_range(store, request, size)
}

fn upsert_next<S: SequenceStore + ?Sized>(
    store: &S,
    request: &NextValue,
) -> Result<i64, SequenceError> {
    store
        .upsert_increment(&request.name, request.initial_value, 1)
        .map_err(|e| SequenceError::from_storage(&request.name, e))
}

fn locked_next<S: SequenceStore + ?Sized>(
    store: &S,
    request: &NextValue,
) -> Result<i64, SequenceError> {
    let name = request.name.as_str();
    let storage_err = |e| SequenceError::from_storage(name, e);

    let mut txn = store.begin(request.lock_mode()).map_err(storage_err)?;
    let (mut sequence, created) = txn
        .get_or_create_for_update(name, request.initial_value)
        .map_err(storage_err)?;

    if created {
        tracing::trace!(sequence = name, last = sequence.last, "Created sequence");
    } else {
        // An increment past i64::MAX has reached any reset threshold.
        sequence.last = match (sequence.last.checked_add(1), request.reset_value) {
            (Some(next), Some(reset)) if next < reset => next,
            (Some(next), None) => next,
            (None, None) => return Err(SequenceError::Overflow),
            (_, Some(reset)) => {
                tracing::debug!(sequence = name, reset, "Sequence wrapped");
                request.initial_value
            }
        };
        txn.save(&sequence).map_err(storage_err)?;
    }

    txn.commit().map_err(storage_err)?;
    Ok(sequence.last)
}

fn locked_next_range<S: SequenceStore + ?Sized>(
    store: &S,
    request: &NextValues,
    size: i64,
) -> Result<Vec<i64>, SequenceError> {
    let name = request.name.as_str();
    let storage_err = |e| SequenceError::from_storage(name, e);

    let creation_last = request
        .initial_value
        .checked_add(size - 1)
        .ok_or(SequenceError::Overflow)?;

    let mut txn = store.begin(request.lock_mode()).map_err(storage_err)?;
    let (mut sequence, created) = txn
        .get_or_create_for_update(name, creation_last)
        .map_err(storage_err)?;

    if created {
        tracing::trace!(sequence = name, last = sequence.last, "Created sequence");
    } else {
        sequence.last = sequence
            .last
            .checked_add(size)
            .ok_or(SequenceError::Overflow)?;
        txn.save(&sequence).map_err(storage_err)?;
    }

    txn.commit().map_err(storage_err)?;

    // A sequence created with last == 1 always hands out 1..=size.
    // TODO: for initial_value < 1 this returns values above `last`; decide whether to drop the special case.
    if created && sequence.last == 1 {
        return Ok((1..=size).collect());
    }
    Ok((sequence.last - size + 1..=sequence.last).collect())
}

/// Allocates from a fixed store handle.
///
/// The handle is chosen by whoever builds the allocator; nothing is looked
/// up globally. Free functions [`next_value`] and [`next_values`] take the
/// store per call instead.
#[derive(Debug)]
pub struct SequenceAllocator<S> {
    store: S,
}

impl<S: SequenceStore> SequenceAllocator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Next value of `name`, starting at 1.
    pub fn next_value(&self, name: &str) -> Result<i64, SequenceError> {
        next_value(&self.store, &NextValue::new(name))
    }

    pub fn next_value_with(&self, request: &NextValue) -> Result<i64, SequenceError> {
        next_value(&self.store, request)
    }

    /// Next `size` values of `name`, starting at 1.
    pub fn next_values(&self, size: u64, name: &str) -> Result<Vec<i64>, SequenceError> {
        next_values(&self.store, &NextValues::new(size, name))
    }

    pub fn next_values_with(&self, request: &NextValues) -> Result<Vec<i64>, SequenceError> {
        next_values(&self.store, request)
    }
}
