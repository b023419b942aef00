use std::sync::{Arc, Mutex};

use super::{JournalRecord, Persistence};
use crate::error::PersistenceError;

/// Journal kept in process memory. It survives stopping and restarting a
/// store, not the process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJournal {
    records: Arc<Mutex<Vec<JournalRecord>>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Persistence for InMemoryJournal {
    fn append(&self, records: &[JournalRecord]) -> Result<(), PersistenceError> {
        let mut journal = self.records.lock().map_err(|_| PersistenceError::Poisoned)?;
        journal.extend_from_slice(records);
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalRecord>, PersistenceError> {
        let journal = self.records.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(journal.clone())
    }

    fn rewrite(&self, records: &[JournalRecord]) -> Result<(), PersistenceError> {
        let mut journal = self.records.lock().map_err(|_| PersistenceError::Poisoned)?;
        *journal = records.to_vec();
        Ok(())
    }
}
