use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::Result;
use crate::filter::Filter;
use crate::item::{LockId, StoredItem};
use crate::stream::StreamNode;
use crate::transaction::Transaction;

/// Claims each item it produces with a lock only this cursor holds.
///
/// Items locked by another cursor are skipped rather than waited for, so
/// several locking cursors on one stream partition its items between them.
/// A produced item stays locked until it is removed with
/// [`lock_id`](Self::lock_id), unlocked, or the cursor is dropped.
pub struct LockingCursor {
    stream: Arc<StreamNode>,
    filter: Filter,
    lock: LockId,
    position: Option<u64>,
    held: Vec<u64>,
}

impl LockingCursor {
    pub(crate) fn open(stream: Arc<StreamNode>, filter: Filter) -> Result<Self> {
        let lock = stream.store()?.ids.next_lock();
        Ok(Self {
            stream,
            filter,
            lock,
            position: None,
            held: Vec::new(),
        })
    }

    /// Next available item accepted by the filter, now locked by this
    /// cursor, or `None` once the stream holds nothing further.
    pub fn next(&mut self) -> Result<Option<StoredItem>> {
        while let Some(candidate) = self.stream.next_available_after(self.position)? {
            self.position = Some(candidate.sequence);
            if !self.filter.matches(&candidate)? {
                continue;
            }
            if let Some(locked) = self.stream.try_lock_item(candidate.sequence, self.lock)? {
                self.held.push(locked.sequence);
                trace!(item = %locked.id, lock = %self.lock, "item locked");
                return Ok(Some(locked));
            }
        }
        Ok(None)
    }

    /// The lock this cursor places on the items it produces.
    pub fn lock_id(&self) -> LockId {
        self.lock
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Have `transaction` release every lock of this cursor if it rolls
    /// back.
    pub fn enlist(&self, transaction: &Transaction) -> Result<()> {
        transaction.enlist(&self.stream, self.lock)
    }

    /// Release every item this cursor still holds. Returns how many were
    /// released.
    pub fn unlock_all(&mut self) -> Result<usize> {
        if self.held.is_empty() {
            return Ok(0);
        }
        let released = self.stream.unlock_sequences(self.lock, &self.held)?;
        self.held.clear();
        Ok(released)
    }
}

impl Drop for LockingCursor {
    fn drop(&mut self) {
        match self.unlock_all() {
            Ok(0) => {}
            Ok(released) => {
                warn!(lock = %self.lock, released, "locking cursor dropped while holding items");
            }
            Err(err) => {
                warn!(lock = %self.lock, error = %err, "failed to release cursor locks on drop");
            }
        }
    }
}
