use crate::allocator::{NextValue, NextValues};
use crate::contracts::SequenceStore;

/// How an allocation is carried out against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One insert-or-increment-returning statement.
    AtomicUpsert,
    /// Row lock, read, compute, write, commit.
    Locked,
}

/// Picks the strategy for a single-value allocation.
///
/// The upsert cannot wrap at a reset threshold nor fail fast on a held
/// lock, so either option forces the locked path.
pub fn select_strategy<S: SequenceStore + ?Sized>(store: &S, request: &NextValue) -> Strategy {
    if request.reset_value.is_none() && !request.nowait && store.supports_atomic_upsert() {
        Strategy::AtomicUpsert
    } else {
        Strategy::Locked
    }
}

/// Picks the strategy for a range allocation.
///
/// Always `Locked`: an upsert adding `size` returns only the new upper
/// bound, and whether the row was inserted or updated is not observable,
/// so the first range of a fresh sequence cannot be told apart.
pub fn select_range_strategy<S: SequenceStore + ?Sized>(
    _store: &S,
    _request: &NextValues,
) -> Strategy {
    Strategy::Locked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteConfig, SqliteStore};

    fn store(atomic_upsert: bool) -> SqliteStore {
        SqliteStore::open_in_memory_with_config(SqliteConfig {
            atomic_upsert,
            ..SqliteConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn plain_increment_uses_upsert_when_supported() {
        let store = store(true);
        assert_eq!(
            select_strategy(&store, &NextValue::new("s")),
            Strategy::AtomicUpsert
        );
    }

    #[test]
    fn reset_or_nowait_forces_locked() {
        let store = store(true);
        assert_eq!(
            select_strategy(&store, &NextValue::new("s").reset_value(10)),
            Strategy::Locked
        );
        assert_eq!(
            select_strategy(&store, &NextValue::new("s").nowait(true)),
            Strategy::Locked
        );
    }

    #[test]
    fn unsupported_store_uses_locked() {
        let store = store(false);
        assert_eq!(
            select_strategy(&store, &NextValue::new("s")),
            Strategy::Locked
        );
    }

    #[test]
    fn ranges_always_use_locked() {
        let store = store(true);
        assert_eq!(
            select_range_strategy(&store, &NextValues::of(5)),
            Strategy::Locked
        );
    }
}
