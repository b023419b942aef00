use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::ids::UniqueValues;
use crate::config::MessageStoreConfig;
use crate::error::{Result, StoreError};
use crate::events::StoreEvent;
#[cfg(feature = "emitter")]
use crate::events::StoreEvents;
use crate::persistence::Persistence;
use crate::stream::{StreamId, StreamNode};

/// What exists only while the store is started.
pub(crate) struct Runtime {
    pub epoch: u64,
    pub root: Arc<StreamNode>,
    pub persistence: Arc<dyn Persistence>,
}

/// State shared by a store and every stream and transaction bound to it.
pub(crate) struct StoreInner {
    pub(crate) config: MessageStoreConfig,
    pub(crate) ids: UniqueValues,
    pub(crate) journal: Option<Arc<dyn Persistence>>,
    active_epoch: AtomicU64,
    pub(crate) runtime: RwLock<Option<Runtime>>,
    registry: RwLock<HashMap<StreamId, Weak<StreamNode>>>,
    #[cfg(feature = "emitter")]
    pub(crate) events: StoreEvents,
}

impl StoreInner {
    pub(crate) fn new(config: MessageStoreConfig, journal: Option<Arc<dyn Persistence>>) -> Self {
        Self {
            config,
            ids: UniqueValues::new(),
            journal,
            active_epoch: AtomicU64::new(0),
            runtime: RwLock::new(None),
            registry: RwLock::new(HashMap::new()),
            #[cfg(feature = "emitter")]
            events: StoreEvents::new(),
        }
    }

    /// Whether `epoch` names the store start that is currently running.
    pub(crate) fn is_live(&self, epoch: u64) -> bool {
        epoch != 0 && self.active_epoch.load(Ordering::Acquire) == epoch
    }

    pub(crate) fn is_started(&self) -> bool {
        self.active_epoch.load(Ordering::Acquire) != 0
    }

    pub(crate) fn activate(&self, epoch: u64) {
        self.active_epoch.store(epoch, Ordering::Release);
    }

    pub(crate) fn deactivate(&self) {
        self.active_epoch.store(0, Ordering::Release);
    }

    pub(crate) fn root(&self) -> Result<Arc<StreamNode>> {
        let runtime = self
            .runtime
            .read()
            .map_err(|_| StoreError::LockPoisoned("store runtime"))?;
        runtime
            .as_ref()
            .map(|r| Arc::clone(&r.root))
            .ok_or(StoreError::StoreNotStarted)
    }

    pub(crate) fn persistence(&self) -> Result<Arc<dyn Persistence>> {
        let runtime = self
            .runtime
            .read()
            .map_err(|_| StoreError::LockPoisoned("store runtime"))?;
        runtime
            .as_ref()
            .map(|r| Arc::clone(&r.persistence))
            .ok_or(StoreError::StoreNotStarted)
    }

    pub(crate) fn register(&self, id: StreamId, node: &Arc<StreamNode>) -> Result<()> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| StoreError::LockPoisoned("stream registry"))?;
        registry.insert(id, Arc::downgrade(node));
        Ok(())
    }

    pub(crate) fn unregister(&self, id: StreamId) -> Result<()> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| StoreError::LockPoisoned("stream registry"))?;
        registry.remove(&id);
        Ok(())
    }

    pub(crate) fn replace_registry(&self, streams: HashMap<StreamId, Weak<StreamNode>>) -> Result<()> {
        let mut registry = self
            .registry
            .write()
            .map_err(|_| StoreError::LockPoisoned("stream registry"))?;
        *registry = streams;
        Ok(())
    }

    pub(crate) fn lookup(&self, id: StreamId) -> Result<Option<Arc<StreamNode>>> {
        let registry = self
            .registry
            .read()
            .map_err(|_| StoreError::LockPoisoned("stream registry"))?;
        Ok(registry.get(&id).and_then(Weak::upgrade))
    }

    pub(crate) fn streams(&self) -> Result<Vec<Arc<StreamNode>>> {
        let registry = self
            .registry
            .read()
            .map_err(|_| StoreError::LockPoisoned("stream registry"))?;
        Ok(registry.values().filter_map(Weak::upgrade).collect())
    }

    #[cfg(feature = "emitter")]
    pub(crate) fn publish(&self, events: Vec<StoreEvent>) {
        self.events.emit_all(events);
    }

    #[cfg(not(feature = "emitter"))]
    pub(crate) fn publish(&self, _events: Vec<StoreEvent>) {}
}
