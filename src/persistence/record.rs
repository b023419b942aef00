use serde::{Deserialize, Serialize};

use crate::item::ItemId;
use crate::stream::StreamId;

/// One committed change to persistent state.
///
/// Only entries stored with `StorageStrategy::Always` are journaled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    StreamAdded {
        stream: StreamId,
        /// `None` for streams held directly by the store.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent: Option<StreamId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },
    StreamRemoved {
        stream: StreamId,
    },
    ItemAdded {
        item: ItemId,
        stream: StreamId,
        sequence: u64,
        priority: u8,
        #[serde(with = "payload_serde")]
        payload: Vec<u8>,
    },
    ItemRemoved {
        item: ItemId,
        stream: StreamId,
    },
}

impl JournalRecord {
    /// Highest store-unique id the record mentions.
    pub fn highest_id(&self) -> u64 {
        match self {
            JournalRecord::StreamAdded { stream, parent, .. } => {
                stream.0.max(parent.map(|p| p.0).unwrap_or_default())
            }
            JournalRecord::StreamRemoved { stream } => stream.0,
            JournalRecord::ItemAdded { item, stream, .. }
            | JournalRecord::ItemRemoved { item, stream } => item.0.max(stream.0),
        }
    }
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(payload).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
