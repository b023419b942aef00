use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{ItemId, LockId, StorageStrategy, StoredItem};
use crate::stream::{StreamId, StreamNode};
use crate::transaction::TransactionId;

/// Lifecycle of an item inside its stream.
///
/// An item that finished removing is dropped from the stream, so there is no
/// `Removed` state to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemState {
    /// Added under a transaction that has not committed yet.
    Adding { transaction: TransactionId },
    /// Committed and free.
    Available,
    /// Committed and held by a locking cursor.
    Locked { lock: LockId },
    /// Being removed under a transaction that has not committed yet.
    /// `lock` is the lock that was presented for the removal.
    Removing {
        transaction: TransactionId,
        lock: LockId,
    },
}

impl ItemState {
    pub fn is_available(&self) -> bool {
        matches!(self, ItemState::Available)
    }

    /// The lock currently held on the item, `LockId::NONE` if unlocked.
    pub fn lock_id(&self) -> LockId {
        match self {
            ItemState::Locked { lock } => *lock,
            _ => LockId::NONE,
        }
    }
}

/// The stream's record of one item.
#[derive(Debug, Clone)]
pub(crate) struct ItemLink {
    pub id: ItemId,
    pub sequence: u64,
    pub priority: u8,
    pub storage: StorageStrategy,
    pub payload: Vec<u8>,
    pub state: ItemState,
    pub unlock_count: u32,
}

impl ItemLink {
    pub fn snapshot(&self, stream_id: StreamId, stream: &Arc<StreamNode>) -> StoredItem {
        StoredItem {
            id: self.id,
            stream_id,
            sequence: self.sequence,
            priority: self.priority,
            storage: self.storage,
            payload: self.payload.clone(),
            state: self.state,
            unlock_count: self.unlock_count,
            stream: Arc::downgrade(stream),
        }
    }
}
