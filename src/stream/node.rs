use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use tracing::{debug, trace};

use super::StreamId;
use crate::error::{Result, StoreError};
use crate::filter::{Filter, Filterable};
use crate::item::{Item, ItemId, ItemLink, ItemState, LockId, StorageStrategy, StoredItem};
use crate::statistics::Statistics;
use crate::store::StoreInner;
use crate::transaction::{Transaction, TransactionId, WorkItem};

/// Where a stream stands relative to its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Membership {
    Unregistered,
    Adding(TransactionId),
    Registered,
    Removing(TransactionId),
    Removed,
}

/// Binding of a stream to the store start it was registered under.
pub(crate) struct Attachment {
    pub store: Weak<StoreInner>,
    pub epoch: u64,
    pub parent: Weak<StreamNode>,
}

/// A container's record of one child stream.
pub(crate) struct ChildLink {
    pub node: Arc<StreamNode>,
    pub membership: Membership,
}

pub(crate) struct StreamState {
    pub membership: Membership,
    pub attachment: Option<Attachment>,
    pub next_item_sequence: u64,
    pub next_child_sequence: u64,
    pub items: BTreeMap<u64, ItemLink>,
    pub index: HashMap<ItemId, u64>,
    pub children: BTreeMap<u64, ChildLink>,
    pub stats: Statistics,
}

impl StreamState {
    fn new(membership: Membership, attachment: Option<Attachment>) -> Self {
        Self {
            membership,
            attachment,
            next_item_sequence: 0,
            next_child_sequence: 0,
            items: BTreeMap::new(),
            index: HashMap::new(),
            children: BTreeMap::new(),
            stats: Statistics::default(),
        }
    }

    /// The store this stream belongs to, provided that store start is
    /// still the running one.
    pub(crate) fn live_store(&self) -> Result<Arc<StoreInner>> {
        let attachment = self.attachment.as_ref().ok_or_else(not_added)?;
        let store = attachment
            .store
            .upgrade()
            .ok_or(StoreError::StoreNotStarted)?;
        if !store.is_live(attachment.epoch) {
            return Err(StoreError::StoreNotStarted);
        }
        Ok(store)
    }

    /// Like [`live_store`](Self::live_store), and additionally requires the
    /// stream to accept new items and child streams.
    fn accepting_store(&self) -> Result<Arc<StoreInner>> {
        let store = self.live_store()?;
        match self.membership {
            Membership::Adding(_) | Membership::Registered | Membership::Removing(_) => Ok(store),
            Membership::Unregistered => Err(not_added()),
            Membership::Removed => Err(StoreError::Protocol(
                "stream has been removed from the message store".into(),
            )),
        }
    }

    fn item_mut(&mut self, sequence: u64, id: ItemId) -> Result<&mut ItemLink> {
        self.items
            .get_mut(&sequence)
            .filter(|link| link.id == id)
            .ok_or_else(|| StoreError::Protocol(format!("item {} is not in this stream", id)))
    }
}

fn not_added() -> StoreError {
    StoreError::Protocol("stream has not been added to a message store".into())
}

fn after(sequence: Option<u64>) -> (Bound<u64>, Bound<u64>) {
    match sequence {
        Some(sequence) => (Bound::Excluded(sequence), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

/// Shared state behind an [`ItemStream`](super::ItemStream) handle.
pub(crate) struct StreamNode {
    storage: StorageStrategy,
    max_items: Option<usize>,
    id: OnceLock<StreamId>,
    position: AtomicU64,
    state: Mutex<StreamState>,
}

impl StreamNode {
    pub(crate) fn new(storage: StorageStrategy, max_items: Option<usize>) -> Self {
        Self {
            storage,
            max_items,
            id: OnceLock::new(),
            position: AtomicU64::new(0),
            state: Mutex::new(StreamState::new(Membership::Unregistered, None)),
        }
    }

    /// The top-level container of a store start. It is registered from
    /// birth and can hold persistent streams.
    pub(crate) fn root(store: Weak<StoreInner>, epoch: u64) -> Arc<Self> {
        let id = OnceLock::new();
        let _ = id.set(StreamId::ROOT);
        Arc::new(Self {
            storage: StorageStrategy::Always,
            max_items: None,
            id,
            position: AtomicU64::new(0),
            state: Mutex::new(StreamState::new(
                Membership::Registered,
                Some(Attachment {
                    store,
                    epoch,
                    parent: Weak::new(),
                }),
            )),
        })
    }

    pub(crate) fn storage(&self) -> StorageStrategy {
        self.storage
    }

    pub(crate) fn max_items(&self) -> Option<usize> {
        self.max_items
    }

    pub(crate) fn id(&self) -> Option<StreamId> {
        self.id.get().copied()
    }

    pub(crate) fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, StreamState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::LockPoisoned("stream"))
    }

    fn require_id(&self) -> Result<StreamId> {
        self.id().ok_or_else(not_added)
    }

    pub(crate) fn store(&self) -> Result<Arc<StoreInner>> {
        self.lock()?.live_store()
    }

    pub(crate) fn statistics(&self) -> Result<Statistics> {
        Ok(self.lock()?.stats)
    }

    pub(crate) fn is_registered(&self) -> Result<bool> {
        Ok(self.lock()?.membership == Membership::Registered)
    }

    // --- Items ---

    pub(crate) fn add_item(self: &Arc<Self>, item: Item, transaction: &Transaction) -> Result<StoredItem> {
        transaction.execute(|scope| {
            scope.reserve()?;
            let mut guard = self.lock()?;
            let store = guard.accepting_store()?;
            let stream_id = self.require_id()?;
            if item.storage > self.storage {
                return Err(StoreError::Protocol(format!(
                    "a {:?} item cannot be added to {:?} stream {}",
                    item.storage, self.storage, stream_id
                )));
            }
            let state = &mut *guard;
            if let Some(limit) = self.max_items {
                if state.stats.total_item_count() as usize >= limit {
                    return Err(StoreError::StreamIsFull {
                        stream: stream_id,
                        limit,
                    });
                }
            }

            let id = ItemId(store.ids.next_value());
            let sequence = state.next_item_sequence;
            state.next_item_sequence += 1;
            let link = ItemLink {
                id,
                sequence,
                priority: item.priority,
                storage: item.storage,
                payload: item.payload,
                state: ItemState::Adding {
                    transaction: scope.id(),
                },
                unlock_count: 0,
            };
            let stored = link.snapshot(stream_id, self);
            state.items.insert(sequence, link);
            state.index.insert(id, sequence);
            state.stats.add_requested();
            scope.record(WorkItem::AddItem {
                stream: Arc::clone(self),
                sequence,
            });
            trace!(stream = %stream_id, item = %id, sequence, transaction = %scope.id(), "item add requested");
            Ok(stored)
        })
    }

    /// First available item positioned after `sequence`, regardless of any
    /// filter.
    pub(crate) fn next_available_after(self: &Arc<Self>, sequence: Option<u64>) -> Result<Option<StoredItem>> {
        let state = self.lock()?;
        state.live_store()?;
        let stream_id = self.require_id()?;
        Ok(state
            .items
            .range(after(sequence))
            .map(|(_, link)| link)
            .find(|link| link.state.is_available())
            .map(|link| link.snapshot(stream_id, self)))
    }

    pub(crate) fn find_first_item(self: &Arc<Self>, filter: &Filter) -> Result<Option<StoredItem>> {
        let mut position = None;
        while let Some(candidate) = self.next_available_after(position)? {
            position = Some(candidate.sequence);
            if filter.matches(&candidate)? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    pub(crate) fn remove_first_item(
        self: &Arc<Self>,
        filter: &Filter,
        transaction: &Transaction,
    ) -> Result<Option<StoredItem>> {
        transaction.execute(|scope| {
            scope.reserve()?;
            let mut position = None;
            while let Some(mut candidate) = self.next_available_after(position)? {
                position = Some(candidate.sequence);
                if !filter.matches(&candidate)? {
                    continue;
                }
                // The filter ran unlocked; only take the item if nobody
                // claimed it in the meantime.
                let mut guard = self.lock()?;
                let state = &mut *guard;
                let Some(link) = state.items.get_mut(&candidate.sequence) else {
                    continue;
                };
                if !link.state.is_available() {
                    continue;
                }
                link.state = ItemState::Removing {
                    transaction: scope.id(),
                    lock: LockId::NONE,
                };
                candidate.state = link.state;
                state.stats.remove_requested(false);
                scope.record(WorkItem::RemoveItem {
                    stream: Arc::clone(self),
                    sequence: candidate.sequence,
                });
                trace!(stream = %candidate.stream_id, item = %candidate.id, transaction = %scope.id(), "item remove requested");
                return Ok(Some(candidate));
            }
            Ok(None)
        })
    }

    pub(crate) fn remove_item(
        self: &Arc<Self>,
        sequence: u64,
        id: ItemId,
        lock: LockId,
        transaction: &Transaction,
    ) -> Result<()> {
        transaction.execute(|scope| {
            scope.reserve()?;
            let mut guard = self.lock()?;
            guard.live_store()?;
            let state = &mut *guard;
            let link = state.item_mut(sequence, id)?;
            let was_locked = match link.state {
                ItemState::Available if lock.is_none() => false,
                ItemState::Available => {
                    return Err(StoreError::LockMismatch {
                        item: id,
                        presented: lock,
                        held: LockId::NONE,
                    })
                }
                ItemState::Locked { lock: held } if held == lock => true,
                ItemState::Locked { lock: held } => {
                    return Err(StoreError::LockMismatch {
                        item: id,
                        presented: lock,
                        held,
                    })
                }
                ItemState::Adding { .. } => {
                    return Err(StoreError::Protocol(format!(
                        "item {} has not been committed",
                        id
                    )))
                }
                ItemState::Removing { .. } => {
                    return Err(StoreError::Protocol(format!(
                        "item {} is already being removed",
                        id
                    )))
                }
            };
            link.state = ItemState::Removing {
                transaction: scope.id(),
                lock,
            };
            state.stats.remove_requested(was_locked);
            scope.record(WorkItem::RemoveItem {
                stream: Arc::clone(self),
                sequence,
            });
            trace!(item = %id, lock = %lock, transaction = %scope.id(), "item remove requested");
            Ok(())
        })
    }

    /// Lock the item at `sequence` for `lock` if it is still available.
    pub(crate) fn try_lock_item(self: &Arc<Self>, sequence: u64, lock: LockId) -> Result<Option<StoredItem>> {
        let mut guard = self.lock()?;
        guard.live_store()?;
        let stream_id = self.require_id()?;
        let state = &mut *guard;
        let Some(link) = state.items.get_mut(&sequence) else {
            return Ok(None);
        };
        if !link.state.is_available() {
            return Ok(None);
        }
        link.state = ItemState::Locked { lock };
        state.stats.locked();
        Ok(Some(link.snapshot(stream_id, self)))
    }

    pub(crate) fn unlock_item(&self, sequence: u64, id: ItemId, lock: LockId) -> Result<()> {
        let mut guard = self.lock()?;
        guard.live_store()?;
        let state = &mut *guard;
        let link = state.item_mut(sequence, id)?;
        match link.state {
            ItemState::Locked { lock: held } if held == lock => {
                link.state = ItemState::Available;
                link.unlock_count += 1;
                state.stats.unlocked();
                Ok(())
            }
            ItemState::Locked { lock: held } => Err(StoreError::LockMismatch {
                item: id,
                presented: lock,
                held,
            }),
            ItemState::Available => Err(StoreError::LockMismatch {
                item: id,
                presented: lock,
                held: LockId::NONE,
            }),
            _ => Err(StoreError::Protocol(format!("item {} is not locked", id))),
        }
    }

    /// Release `lock` on the listed items that still hold it. Items already
    /// removed or being removed are left alone.
    pub(crate) fn unlock_sequences(&self, lock: LockId, sequences: &[u64]) -> Result<usize> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let mut released = 0;
        for sequence in sequences {
            if let Some(link) = state.items.get_mut(sequence) {
                if link.state == (ItemState::Locked { lock }) {
                    link.state = ItemState::Available;
                    link.unlock_count += 1;
                    state.stats.unlocked();
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    /// Release `lock` on every item of the stream that still holds it.
    pub(crate) fn unlock_held_by(&self, lock: LockId) -> Result<usize> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let mut released = 0;
        for link in state.items.values_mut() {
            if link.state == (ItemState::Locked { lock }) {
                link.state = ItemState::Available;
                link.unlock_count += 1;
                state.stats.unlocked();
                released += 1;
            }
        }
        Ok(released)
    }

    /// Committed view of the item with `id`, if this stream holds it.
    pub(crate) fn find_item_by_id(self: &Arc<Self>, id: ItemId) -> Result<Option<StoredItem>> {
        let state = self.lock()?;
        let Some(stream_id) = self.id() else {
            return Ok(None);
        };
        Ok(state
            .index
            .get(&id)
            .and_then(|sequence| state.items.get(sequence))
            .filter(|link| !matches!(link.state, ItemState::Adding { .. }))
            .map(|link| link.snapshot(stream_id, self)))
    }

    // --- Child streams ---

    pub(crate) fn add_child(self: &Arc<Self>, child: &Arc<StreamNode>, transaction: &Transaction) -> Result<()> {
        transaction.execute(|scope| {
            scope.reserve()?;
            if Arc::ptr_eq(self, child) {
                return Err(StoreError::Protocol("a stream cannot contain itself".into()));
            }
            let (store, epoch) = {
                let state = self.lock()?;
                let store = state.accepting_store()?;
                let epoch = state.attachment.as_ref().map(|a| a.epoch).unwrap_or_default();
                (store, epoch)
            };
            let parent_id = self.require_id()?;
            if child.storage > self.storage {
                return Err(StoreError::Protocol(format!(
                    "a {:?} stream cannot be added to {:?} stream {}",
                    child.storage, self.storage, parent_id
                )));
            }

            {
                let mut child_state = child.lock()?;
                match child_state.membership {
                    Membership::Unregistered => {}
                    Membership::Removed => {
                        return Err(StoreError::Protocol(
                            "a removed stream cannot be added again".into(),
                        ))
                    }
                    _ => {
                        return Err(StoreError::Protocol(
                            "stream is already registered with a message store".into(),
                        ))
                    }
                }
                child_state.membership = Membership::Adding(scope.id());
                child_state.attachment = Some(Attachment {
                    store: Arc::downgrade(&store),
                    epoch,
                    parent: Arc::downgrade(self),
                });
            }
            let child_id = *child.id.get_or_init(|| StreamId(store.ids.next_value()));

            let linked = self.lock().and_then(|mut guard| {
                guard.accepting_store()?;
                let state = &mut *guard;
                let sequence = state.next_child_sequence;
                state.next_child_sequence += 1;
                child.position.store(sequence, Ordering::Release);
                state.children.insert(
                    sequence,
                    ChildLink {
                        node: Arc::clone(child),
                        membership: Membership::Adding(scope.id()),
                    },
                );
                Ok(())
            });
            if let Err(err) = linked {
                let mut child_state = child.lock()?;
                child_state.membership = Membership::Unregistered;
                child_state.attachment = None;
                return Err(err);
            }

            scope.record(WorkItem::AddStream {
                parent: Arc::clone(self),
                child: Arc::clone(child),
            });
            store.register(child_id, child)?;
            debug!(parent = %parent_id, stream = %child_id, transaction = %scope.id(), "stream add requested");
            Ok(())
        })
    }

    fn next_registered_child_after(&self, sequence: Option<u64>) -> Result<Option<Arc<StreamNode>>> {
        let state = self.lock()?;
        state.live_store()?;
        Ok(state
            .children
            .range(after(sequence))
            .map(|(_, link)| link)
            .find(|link| link.membership == Membership::Registered)
            .map(|link| Arc::clone(&link.node)))
    }

    pub(crate) fn find_first_child(&self, filter: &Filter) -> Result<Option<Arc<StreamNode>>> {
        let mut position = None;
        while let Some(candidate) = self.next_registered_child_after(position)? {
            position = Some(candidate.position());
            if filter.matches(candidate.as_ref())? {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    pub(crate) fn remove_first_child(
        self: &Arc<Self>,
        filter: &Filter,
        transaction: &Transaction,
    ) -> Result<Option<Arc<StreamNode>>> {
        transaction.execute(|scope| {
            scope.reserve()?;
            let mut position = None;
            while let Some(candidate) = self.next_registered_child_after(position)? {
                let sequence = candidate.position();
                position = Some(sequence);
                if !filter.matches(candidate.as_ref())? {
                    continue;
                }
                {
                    let mut state = self.lock()?;
                    match state.children.get_mut(&sequence) {
                        Some(link)
                            if Arc::ptr_eq(&link.node, &candidate)
                                && link.membership == Membership::Registered =>
                        {
                            link.membership = Membership::Removing(scope.id());
                        }
                        _ => continue,
                    }
                }
                scope.record(WorkItem::RemoveStream {
                    parent: Arc::clone(self),
                    child: Arc::clone(&candidate),
                });
                candidate.lock()?.membership = Membership::Removing(scope.id());
                debug!(stream = ?candidate.id(), transaction = %scope.id(), "stream remove requested");
                return Ok(Some(candidate));
            }
            Ok(None)
        })
    }

    // --- Recovery ---

    pub(crate) fn recover_child(
        self: &Arc<Self>,
        child: &Arc<StreamNode>,
        id: StreamId,
        store: &Weak<StoreInner>,
        epoch: u64,
    ) -> Result<()> {
        let _ = child.id.set(id);
        {
            let mut child_state = child.lock()?;
            child_state.membership = Membership::Registered;
            child_state.attachment = Some(Attachment {
                store: store.clone(),
                epoch,
                parent: Arc::downgrade(self),
            });
        }
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let sequence = state.next_child_sequence;
        state.next_child_sequence += 1;
        child.position.store(sequence, Ordering::Release);
        state.children.insert(
            sequence,
            ChildLink {
                node: Arc::clone(child),
                membership: Membership::Registered,
            },
        );
        Ok(())
    }

    pub(crate) fn recover_item(&self, id: ItemId, sequence: u64, priority: u8, payload: Vec<u8>) -> Result<()> {
        let mut guard = self.lock()?;
        let state = &mut *guard;
        state.next_item_sequence = state.next_item_sequence.max(sequence + 1);
        state.index.insert(id, sequence);
        state.items.insert(
            sequence,
            ItemLink {
                id,
                sequence,
                priority,
                storage: StorageStrategy::Always,
                payload,
                state: ItemState::Available,
                unlock_count: 0,
            },
        );
        state.stats.add_requested();
        state.stats.add_committed();
        Ok(())
    }
}

impl Filterable for StreamNode {
    fn filter_id(&self) -> u64 {
        self.id().map(|id| id.0).unwrap_or_default()
    }

    fn filter_sequence(&self) -> u64 {
        self.position()
    }
}
