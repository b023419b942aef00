use std::sync::atomic::{AtomicU64, Ordering};

use crate::item::LockId;
use crate::transaction::TransactionId;

/// Monotonic counters shared by everything in one store.
#[derive(Debug)]
pub(crate) struct UniqueValues {
    value: AtomicU64,
    lock: AtomicU64,
    transaction: AtomicU64,
    tick: AtomicU64,
    epoch: AtomicU64,
}

impl UniqueValues {
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicU64::new(1),
            lock: AtomicU64::new(1),
            transaction: AtomicU64::new(1),
            tick: AtomicU64::new(1),
            epoch: AtomicU64::new(1),
        }
    }

    /// Next id for an item or a stream. Ids are never reused, even across
    /// restarts of a persistent store.
    pub(crate) fn next_value(&self) -> u64 {
        self.value.fetch_add(1, Ordering::Relaxed)
    }

    /// Make sure ids handed out from now on are above `highest`.
    pub(crate) fn advance_past(&self, highest: u64) {
        self.value.fetch_max(highest + 1, Ordering::Relaxed);
    }

    pub(crate) fn next_lock(&self) -> LockId {
        LockId(self.lock.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_transaction(&self) -> TransactionId {
        TransactionId(self.transaction.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::Relaxed)
    }
}
