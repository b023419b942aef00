use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Store-unique identifier of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token proving ownership of an item lock.
///
/// `LockId::NONE` is the sentinel presented when removing an item that is
/// not locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockId(pub u64);

impl LockId {
    pub const NONE: LockId = LockId(0);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Whether an entry must survive a restart of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StorageStrategy {
    /// Held in memory only.
    #[default]
    Never,
    /// Journaled on commit and recovered on start.
    Always,
}

/// An item that has not been added to a stream yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub(crate) payload: Vec<u8>,
    pub(crate) priority: u8,
    pub(crate) storage: StorageStrategy,
}

impl Item {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            priority: 0,
            storage: StorageStrategy::Never,
        }
    }

    /// Create an item with a bitcode-serialized payload.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, bitcode::Error> {
        let bytes = bitcode::serialize(value)?;
        Ok(Self::new(bytes))
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_storage(mut self, storage: StorageStrategy) -> Self {
        self.storage = storage;
        self
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn storage_strategy(&self) -> StorageStrategy {
        self.storage
    }

    /// Decode a bitcode payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }
}
