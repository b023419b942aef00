use std::sync::Arc;

use tracing::{debug, info};

use super::inner::{Runtime, StoreInner};
use super::recovery;
use crate::config::{MessageStoreConfig, PersistenceBackend};
use crate::error::{ConfigError, Result, StoreError};
#[cfg(feature = "emitter")]
use crate::events::StoreEvents;
use crate::filter::Filter;
use crate::item::{ItemId, LockId, StoredItem};
use crate::persistence::{FileJournal, InMemoryJournal, Persistence};
use crate::stream::{ItemStream, StreamId, StreamNode};
use crate::transaction::{Transaction, TransactionFactory};

/// An embedded store of item streams.
///
/// The store is the top-level container: streams added to it directly can
/// hold items and further streams. Nothing can be read or written until
/// [`start`](MessageStore::start) has been called. Clones share the store.
///
/// ```ignore
/// let store = MessageStore::new(MessageStoreConfig::default());
/// store.start()?;
///
/// let auto = store.transaction_factory().create_auto_commit_transaction();
/// let stream = ItemStream::new();
/// store.add(&stream, &auto)?;
/// stream.add_item(Item::new(b"hello".to_vec()), &auto)?;
/// ```
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<StoreInner>,
}

impl MessageStore {
    /// Create a stopped store whose journal is chosen by `config`.
    pub fn new(config: MessageStoreConfig) -> Self {
        let journal: Option<Arc<dyn Persistence>> = match config.persistence {
            PersistenceBackend::Memory => Some(Arc::new(InMemoryJournal::new())),
            PersistenceBackend::File => config
                .journal_path
                .clone()
                .map(|path| Arc::new(FileJournal::new(path)) as Arc<dyn Persistence>),
        };
        Self {
            inner: Arc::new(StoreInner::new(config, journal)),
        }
    }

    /// Create a stopped store that journals to `persistence`, whatever the
    /// configured backend.
    pub fn with_persistence(config: MessageStoreConfig, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            inner: Arc::new(StoreInner::new(config, Some(persistence))),
        }
    }

    pub fn config(&self) -> &MessageStoreConfig {
        &self.inner.config
    }

    /// Configuration value for `key`, or `default` when unset.
    pub fn property(&self, key: &str, default: &str) -> String {
        self.inner.config.property(key, default)
    }

    pub fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    /// Recover persistent streams and items from the journal and begin
    /// accepting work. Starting a started store does nothing.
    pub fn start(&self) -> Result<()> {
        self.inner.config.validate()?;
        let mut runtime = self
            .inner
            .runtime
            .write()
            .map_err(|_| StoreError::LockPoisoned("store runtime"))?;
        if runtime.is_some() {
            debug!("message store already started");
            return Ok(());
        }

        let persistence = self
            .inner
            .journal
            .clone()
            .ok_or(ConfigError::MissingJournalPath)?;
        let records = persistence.load()?;
        let replayed = records.len();

        let epoch = self.inner.ids.next_epoch();
        let root = StreamNode::root(Arc::downgrade(&self.inner), epoch);
        let recovered = recovery::rebuild(&self.inner, &root, epoch, records)?;
        persistence.rewrite(&recovered.records)?;
        self.inner.replace_registry(recovered.streams.clone())?;

        *runtime = Some(Runtime {
            epoch,
            root,
            persistence,
        });
        self.inner.activate(epoch);
        info!(
            epoch,
            replayed,
            streams = recovered.streams.len(),
            items = recovered.items,
            "message store started"
        );
        Ok(())
    }

    /// Stop accepting work and drop all in-memory state. Handles obtained
    /// before the stop report [`StoreError::StoreNotStarted`] from then on.
    pub fn stop(&self) -> Result<()> {
        let mut runtime = self
            .inner
            .runtime
            .write()
            .map_err(|_| StoreError::LockPoisoned("store runtime"))?;
        let Some(stopped) = runtime.take() else {
            return Ok(());
        };
        self.inner.deactivate();
        self.inner.replace_registry(Default::default())?;
        info!(epoch = stopped.epoch, "message store stopped");
        Ok(())
    }

    pub fn transaction_factory(&self) -> TransactionFactory {
        TransactionFactory::new(Arc::clone(&self.inner))
    }

    /// Add a top-level stream. It is registered once `transaction` commits.
    pub fn add(&self, stream: &ItemStream, transaction: &Transaction) -> Result<()> {
        self.inner.root()?.add_child(&stream.node, transaction)
    }

    pub fn find_first_matching(&self, filter: &Filter) -> Result<Option<ItemStream>> {
        Ok(self
            .inner
            .root()?
            .find_first_child(filter)?
            .map(ItemStream::from_node))
    }

    /// Mark the first top-level stream accepted by `filter` for removal.
    /// The commit fails unless the stream is empty by then.
    pub fn remove_first_matching(
        &self,
        filter: &Filter,
        transaction: &Transaction,
    ) -> Result<Option<ItemStream>> {
        Ok(self
            .inner
            .root()?
            .remove_first_child(filter, transaction)?
            .map(ItemStream::from_node))
    }

    /// Committed item with `id`, wherever it is held.
    pub fn find_by_id(&self, id: ItemId) -> Result<Option<StoredItem>> {
        self.inner.root()?;
        for stream in self.inner.streams()? {
            if let Some(item) = stream.find_item_by_id(id)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Registered stream with `id`, at any depth.
    pub fn find_stream_by_id(&self, id: StreamId) -> Result<Option<ItemStream>> {
        self.inner.root()?;
        match self.inner.lookup(id)? {
            Some(node) if node.is_registered()? => Ok(Some(ItemStream::from_node(node))),
            _ => Ok(None),
        }
    }

    /// A lock id no cursor of this store has used.
    pub fn unique_lock_id(&self) -> Result<LockId> {
        self.inner.root()?;
        Ok(self.inner.ids.next_lock())
    }

    /// A strictly increasing counter, unique within this store.
    pub fn unique_tick_count(&self) -> Result<u64> {
        self.inner.root()?;
        Ok(self.inner.ids.next_tick())
    }

    /// Listeners for committed changes.
    #[cfg(feature = "emitter")]
    pub fn events(&self) -> &StoreEvents {
        &self.inner.events
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("started", &self.is_started())
            .field("persistence", &self.inner.config.persistence)
            .finish()
    }
}
