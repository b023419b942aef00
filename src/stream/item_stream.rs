use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::node::StreamNode;
use crate::cursor::{LockingCursor, NonLockingCursor};
use crate::error::Result;
use crate::filter::{Filter, Filterable};
use crate::item::{Item, StorageStrategy, StoredItem};
use crate::statistics::Statistics;
use crate::transaction::Transaction;

/// Store-unique identifier of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl StreamId {
    /// The store's top-level container.
    pub const ROOT: StreamId = StreamId(0);

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An ordered, transactional container of items and of child streams.
///
/// A stream does nothing until it has been added to a started
/// [`MessageStore`](crate::MessageStore), directly or through a parent
/// stream. Clones are handles to the same stream.
#[derive(Clone)]
pub struct ItemStream {
    pub(crate) node: Arc<StreamNode>,
}

impl ItemStream {
    /// A stream that lives in memory only.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// A stream that is journaled and comes back after a restart.
    pub fn persistent() -> Self {
        Self::builder().storage(StorageStrategy::Always).build()
    }

    pub fn builder() -> ItemStreamBuilder {
        ItemStreamBuilder::default()
    }

    pub(crate) fn from_node(node: Arc<StreamNode>) -> Self {
        Self { node }
    }

    /// Assigned when the stream is first added to a store.
    pub fn id(&self) -> Option<StreamId> {
        self.node.id()
    }

    pub fn storage_strategy(&self) -> StorageStrategy {
        self.node.storage()
    }

    pub fn max_items(&self) -> Option<usize> {
        self.node.max_items()
    }

    /// Whether the stream's registration has been committed and no removal
    /// of it has been.
    pub fn is_registered(&self) -> Result<bool> {
        self.node.is_registered()
    }

    // --- Items ---

    /// Append an item. It becomes visible to finds and cursors once
    /// `transaction` commits.
    pub fn add_item(&self, item: Item, transaction: &Transaction) -> Result<StoredItem> {
        self.node.add_item(item, transaction)
    }

    /// Oldest available item accepted by `filter`, without changing it.
    pub fn find_first_matching_item(&self, filter: &Filter) -> Result<Option<StoredItem>> {
        self.node.find_first_item(filter)
    }

    /// Oldest available item accepted by `filter`, marked for removal under
    /// `transaction`.
    pub fn remove_first_matching_item(
        &self,
        filter: &Filter,
        transaction: &Transaction,
    ) -> Result<Option<StoredItem>> {
        self.node.remove_first_item(filter, transaction)
    }

    pub fn new_non_locking_cursor(&self, filter: Filter) -> Result<NonLockingCursor> {
        NonLockingCursor::open(Arc::clone(&self.node), filter)
    }

    pub fn new_locking_cursor(&self, filter: Filter) -> Result<LockingCursor> {
        LockingCursor::open(Arc::clone(&self.node), filter)
    }

    pub fn statistics(&self) -> Result<Statistics> {
        self.node.statistics()
    }

    // --- Child streams ---

    /// Nest `stream` inside this one. The child is registered once
    /// `transaction` commits.
    pub fn add_item_stream(&self, stream: &ItemStream, transaction: &Transaction) -> Result<()> {
        self.node.add_child(&stream.node, transaction)
    }

    pub fn find_first_matching_item_stream(&self, filter: &Filter) -> Result<Option<ItemStream>> {
        Ok(self.node.find_first_child(filter)?.map(ItemStream::from_node))
    }

    /// Mark the first registered child accepted by `filter` for removal.
    /// The commit fails unless the child is empty by then.
    pub fn remove_first_matching_item_stream(
        &self,
        filter: &Filter,
        transaction: &Transaction,
    ) -> Result<Option<ItemStream>> {
        Ok(self
            .node
            .remove_first_child(filter, transaction)?
            .map(ItemStream::from_node))
    }
}

impl Default for ItemStream {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ItemStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl Eq for ItemStream {}

impl fmt::Debug for ItemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemStream")
            .field("id", &self.id())
            .field("storage", &self.storage_strategy())
            .field("max_items", &self.max_items())
            .finish()
    }
}

impl Filterable for ItemStream {
    fn filter_id(&self) -> u64 {
        self.node.filter_id()
    }

    fn filter_sequence(&self) -> u64 {
        self.node.filter_sequence()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ItemStreamBuilder {
    storage: StorageStrategy,
    max_items: Option<usize>,
}

impl ItemStreamBuilder {
    pub fn storage(mut self, storage: StorageStrategy) -> Self {
        self.storage = storage;
        self
    }

    /// Reject adds once the stream holds this many items, counting those
    /// still being added or removed.
    pub fn max_items(mut self, limit: usize) -> Self {
        self.max_items = Some(limit);
        self
    }

    pub fn build(self) -> ItemStream {
        ItemStream {
            node: Arc::new(StreamNode::new(self.storage, self.max_items)),
        }
    }
}
