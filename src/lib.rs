//! Embedded, transactional store of item streams.
//!
//! A [`MessageStore`] holds [`ItemStream`]s, which hold items and further
//! streams. Every change runs under a [`Transaction`]: auto-commit
//! transactions apply each operation immediately, local transactions apply
//! a group of operations together on commit. Streams and items stored with
//! [`StorageStrategy::Always`] are journaled and recovered when the store
//! starts again.

pub mod config;
pub mod cursor;
pub mod error;
pub mod events;
pub mod filter;
pub mod item;
pub mod persistence;
pub mod statistics;
pub mod store;
pub mod stream;
pub mod transaction;
pub mod worker;

pub use config::{MessageStoreConfig, PersistenceBackend};
pub use cursor::{LockingCursor, NonLockingCursor};
pub use error::{ConfigError, PersistenceError, Result, StoreError, TransactionError};
#[cfg(feature = "emitter")]
pub use events::StoreEvents;
pub use events::{StoreEvent, StoreEventKind};
pub use filter::{Filter, Filterable};
pub use item::{Item, ItemId, ItemState, LockId, StorageStrategy, StoredItem};
pub use persistence::{FileJournal, InMemoryJournal, JournalRecord, Persistence};
pub use statistics::Statistics;
pub use store::MessageStore;
pub use stream::{ItemStream, ItemStreamBuilder, StreamId};
pub use transaction::{Transaction, TransactionFactory, TransactionId, TransactionState};
pub use worker::{BatchReport, DrainStats, DrainWorker, DrainWorkerThread};
