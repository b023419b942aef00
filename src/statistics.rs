//! Per-stream item counters.
//!
//! The counters live inside the stream's locked state and are adjusted in
//! the same critical section as the item transition they describe, so a
//! reader never sees one without the other.

use serde::{Deserialize, Serialize};

/// Snapshot of a stream's item counters.
///
/// `total == available + adding + removing` always holds. Locked items are
/// part of `available`; `locked` reports how many of them are held.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub available: u64,
    pub locked: u64,
    pub adding: u64,
    pub removing: u64,
}

impl Statistics {
    pub fn total_item_count(&self) -> u64 {
        self.available + self.adding + self.removing
    }

    pub fn available_item_count(&self) -> u64 {
        self.available
    }

    pub fn locked_item_count(&self) -> u64 {
        self.locked
    }

    pub fn adding_item_count(&self) -> u64 {
        self.adding
    }

    pub fn removing_item_count(&self) -> u64 {
        self.removing
    }

    // Transitions. Each is called exactly once per item state change.

    pub(crate) fn add_requested(&mut self) {
        self.adding += 1;
    }

    pub(crate) fn add_committed(&mut self) {
        self.adding = self.adding.saturating_sub(1);
        self.available += 1;
    }

    pub(crate) fn add_rolled_back(&mut self) {
        self.adding = self.adding.saturating_sub(1);
    }

    pub(crate) fn locked(&mut self) {
        self.locked += 1;
    }

    pub(crate) fn unlocked(&mut self) {
        self.locked = self.locked.saturating_sub(1);
    }

    pub(crate) fn remove_requested(&mut self, was_locked: bool) {
        if was_locked {
            self.unlocked();
        }
        self.available = self.available.saturating_sub(1);
        self.removing += 1;
    }

    pub(crate) fn remove_committed(&mut self) {
        self.removing = self.removing.saturating_sub(1);
    }

    pub(crate) fn remove_rolled_back(&mut self) {
        self.removing = self.removing.saturating_sub(1);
        self.available += 1;
    }
}
