use std::path::PathBuf;

use thiserror::Error;

use crate::item::{ItemId, LockId};
use crate::stream::StreamId;
use crate::transaction::{TransactionId, TransactionState};

/// Result alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Every failure the message store surfaces to callers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has not been started, has been stopped, or the handle
    /// belongs to an earlier start of the store.
    #[error("message store is not started")]
    StoreNotStarted,

    /// The caller violated the add/remove state machine.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Adding would take the stream past its configured item limit.
    #[error("stream {stream} is full (limit {limit})")]
    StreamIsFull { stream: StreamId, limit: usize },

    /// A local transaction tried to hold more work than the store allows.
    #[error("transaction {transaction} is out of cache space (limit {limit} operations)")]
    OutOfCacheSpace {
        transaction: TransactionId,
        limit: usize,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// The lock id presented does not match the lock holding the item.
    #[error("lock mismatch on item {item}: presented {presented}, held {held}")]
    LockMismatch {
        item: ItemId,
        presented: LockId,
        held: LockId,
    },

    /// A custom filter failed while evaluating an entry.
    #[error("filter failed: {0}")]
    Filter(String),

    /// The in-memory structures disagree with each other.
    #[error("severe message store error: {0}")]
    Severe(String),

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Errors a caller can recover from by doing less work per transaction.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            StoreError::StreamIsFull { .. } | StoreError::OutOfCacheSpace { .. }
        )
    }
}

/// Transaction boundary failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("transaction {transaction} is {state:?}, not active")]
    NotActive {
        transaction: TransactionId,
        state: TransactionState,
    },

    #[error("auto-commit transactions cannot be committed or rolled back explicitly")]
    AutoCommitBoundary,

    /// The transaction tried to remove a stream that still has children.
    /// The transaction has been rolled back.
    #[error("stream {stream} still holds {remaining} entries; transaction {transaction} rolled back")]
    StreamNotEmpty {
        transaction: TransactionId,
        stream: StreamId,
        remaining: usize,
    },

    /// The transaction added to a stream whose own add is still pending
    /// under another transaction, or was rolled back. The transaction has
    /// been rolled back.
    #[error("stream {stream} is not committed to the store; transaction {transaction} rolled back")]
    StreamNotCommitted {
        transaction: TransactionId,
        stream: StreamId,
    },
}

/// Failures of the durable medium behind the store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("journal io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("journal record {line} is corrupt: {message}")]
    Corrupt { line: usize, message: String },

    #[error("journal encode failed: {0}")]
    Encode(String),

    #[error("journal lock poisoned")]
    Poisoned,

    #[error("persistence unavailable: {0}")]
    Unavailable(String),
}

/// Invalid store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("property {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("file persistence requires msgstore.journalPath")]
    MissingJournalPath,
}
