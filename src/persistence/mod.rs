//! Durable medium behind persistent streams and items.

mod file;
mod in_memory;
mod record;

pub use file::FileJournal;
pub use in_memory::InMemoryJournal;
pub use record::JournalRecord;

use crate::error::PersistenceError;

/// Append-only journal of committed persistent changes.
///
/// The store appends the records of each commit before making the commit
/// visible, replays the whole journal when it starts and then rewrites it
/// with only the state that is still live.
pub trait Persistence: Send + Sync {
    /// Durably append the records of one commit, all or nothing.
    fn append(&self, records: &[JournalRecord]) -> Result<(), PersistenceError>;

    /// Every record appended so far, oldest first.
    fn load(&self) -> Result<Vec<JournalRecord>, PersistenceError>;

    /// Replace the whole journal with `records`.
    fn rewrite(&self, records: &[JournalRecord]) -> Result<(), PersistenceError>;
}
