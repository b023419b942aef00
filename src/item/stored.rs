use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;

use super::{ItemId, ItemState, LockId, StorageStrategy};
use crate::error::{Result, StoreError};
use crate::filter::Filterable;
use crate::stream::{StreamId, StreamNode};
use crate::transaction::Transaction;

/// A point-in-time view of an item held by a stream.
///
/// The view refers back to its stream by id and through a non-owning
/// handle, so holding on to it never keeps a removed stream alive.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub(crate) id: ItemId,
    pub(crate) stream_id: StreamId,
    pub(crate) sequence: u64,
    pub(crate) priority: u8,
    pub(crate) storage: StorageStrategy,
    pub(crate) payload: Vec<u8>,
    pub(crate) state: ItemState,
    pub(crate) unlock_count: u32,
    pub(crate) stream: Weak<StreamNode>,
}

impl StoredItem {
    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Position of the item in its stream, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn storage_strategy(&self) -> StorageStrategy {
        self.storage
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decode a bitcode payload.
    pub fn decode<T: DeserializeOwned>(&self) -> std::result::Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }

    /// State of the item when this view was taken.
    pub fn state(&self) -> ItemState {
        self.state
    }

    /// Lock held on the item when this view was taken.
    pub fn lock_id(&self) -> LockId {
        self.state.lock_id()
    }

    /// How many times the item has been unlocked without being removed.
    pub fn unlock_count(&self) -> u32 {
        self.unlock_count
    }

    /// Remove the item under `transaction`.
    ///
    /// `lock` must be the lock currently holding the item, or
    /// `LockId::NONE` if the item is unlocked. The removal becomes permanent
    /// when the transaction commits.
    pub fn remove(&self, transaction: &Transaction, lock: LockId) -> Result<()> {
        self.owning_stream()?
            .remove_item(self.sequence, self.id, lock, transaction)
    }

    /// Release a lock taken by a locking cursor.
    pub fn unlock(&self, lock: LockId) -> Result<()> {
        self.owning_stream()?.unlock_item(self.sequence, self.id, lock)
    }

    fn owning_stream(&self) -> Result<Arc<StreamNode>> {
        self.stream.upgrade().ok_or_else(|| {
            StoreError::Protocol(format!(
                "stream {} of item {} no longer exists",
                self.stream_id, self.id
            ))
        })
    }
}

impl Filterable for StoredItem {
    fn filter_id(&self) -> u64 {
        self.id.0
    }

    fn filter_sequence(&self) -> u64 {
        self.sequence
    }

    fn filter_priority(&self) -> u8 {
        self.priority
    }

    fn filter_payload(&self) -> Option<&[u8]> {
        Some(&self.payload)
    }
}
