use std::sync::Arc;

use crate::error::Result;
use crate::filter::Filter;
use crate::item::StoredItem;
use crate::stream::StreamNode;

/// Browses available items without claiming them.
pub struct NonLockingCursor {
    stream: Arc<StreamNode>,
    filter: Filter,
    position: Option<u64>,
}

impl NonLockingCursor {
    pub(crate) fn open(stream: Arc<StreamNode>, filter: Filter) -> Result<Self> {
        stream.store()?;
        Ok(Self {
            stream,
            filter,
            position: None,
        })
    }

    /// Next available item accepted by the filter, or `None` once the
    /// stream holds nothing further.
    pub fn next(&mut self) -> Result<Option<StoredItem>> {
        while let Some(candidate) = self.stream.next_available_after(self.position)? {
            self.position = Some(candidate.sequence);
            if self.filter.matches(&candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }
}
