//! Notifications published after a transaction commits.

use serde::{Deserialize, Serialize};

use crate::item::ItemId;
use crate::stream::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreEventKind {
    ItemAdded,
    ItemRemoved,
    StreamAdded,
    StreamRemoved,
}

impl StoreEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreEventKind::ItemAdded => "ItemAdded",
            StoreEventKind::ItemRemoved => "ItemRemoved",
            StoreEventKind::StreamAdded => "StreamAdded",
            StoreEventKind::StreamRemoved => "StreamRemoved",
        }
    }
}

/// A committed change, as seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    pub stream: StreamId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemId>,
}

impl StoreEvent {
    pub(crate) fn item_added(stream: StreamId, item: ItemId) -> Self {
        Self {
            kind: StoreEventKind::ItemAdded,
            stream,
            item: Some(item),
        }
    }

    pub(crate) fn item_removed(stream: StreamId, item: ItemId) -> Self {
        Self {
            kind: StoreEventKind::ItemRemoved,
            stream,
            item: Some(item),
        }
    }

    pub(crate) fn stream_added(stream: StreamId) -> Self {
        Self {
            kind: StoreEventKind::StreamAdded,
            stream,
            item: None,
        }
    }

    pub(crate) fn stream_removed(stream: StreamId) -> Self {
        Self {
            kind: StoreEventKind::StreamRemoved,
            stream,
            item: None,
        }
    }
}

#[cfg(feature = "emitter")]
pub use emitter::StoreEvents;

#[cfg(feature = "emitter")]
mod emitter {
    use std::sync::Mutex;

    use event_emitter_rs::EventEmitter;
    use tracing::warn;

    use super::{StoreEvent, StoreEventKind};

    /// Listener registry for committed changes.
    ///
    /// Listeners run on the emitter's own threads, so they observe a
    /// change shortly after the commit returns rather than inside it.
    pub struct StoreEvents {
        emitter: Mutex<EventEmitter>,
    }

    impl StoreEvents {
        pub fn new() -> Self {
            Self {
                emitter: Mutex::new(EventEmitter::new()),
            }
        }

        /// Register a listener for one kind of change.
        pub fn on<F>(&self, kind: StoreEventKind, listener: F)
        where
            F: Fn(StoreEvent) + Send + Sync + 'static,
        {
            let Ok(mut emitter) = self.emitter.lock() else {
                warn!(event = kind.as_str(), "event emitter poisoned, listener not registered");
                return;
            };
            emitter.on(kind.as_str(), move |data: String| {
                if let Ok(event) = serde_json::from_str::<StoreEvent>(&data) {
                    listener(event);
                }
            });
        }

        pub(crate) fn emit_all(&self, events: Vec<StoreEvent>) {
            if events.is_empty() {
                return;
            }
            let Ok(mut emitter) = self.emitter.lock() else {
                warn!(events = events.len(), "event emitter poisoned, events dropped");
                return;
            };
            for event in events {
                match serde_json::to_string(&event) {
                    Ok(data) => {
                        emitter.emit(event.kind.as_str(), data);
                    }
                    Err(err) => warn!(error = %err, "failed to encode store event"),
                }
            }
        }
    }

    impl Default for StoreEvents {
        fn default() -> Self {
            Self::new()
        }
    }
}
