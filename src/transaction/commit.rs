//! Applying and undoing a transaction's recorded work.
//!
//! Commit locks every stream the work touched, in address order, checks
//! that the work can be applied, journals the persistent part and only
//! then makes it visible. Any failure before the last step rolls the whole
//! transaction back. Rollback takes one stream lock at a time and never
//! fails; a step that cannot be undone is logged and skipped.

use std::sync::{Arc, MutexGuard};

use tracing::{debug, error, warn};

use super::transaction::{TransactionId, TransactionState, TxCore};
use super::work::WorkItem;
use crate::error::{Result, StoreError, TransactionError};
use crate::events::StoreEvent;
use crate::item::{ItemState, StorageStrategy};
use crate::persistence::JournalRecord;
use crate::store::StoreInner;
use crate::stream::{Membership, StreamId, StreamNode, StreamState};

pub(crate) fn commit(store: &Arc<StoreInner>, core: &mut TxCore) -> Result<()> {
    if core.work.is_empty() {
        core.enlisted.clear();
        core.state = TransactionState::Committed;
        return Ok(());
    }

    match apply(store, core) {
        Ok(applied) => {
            let operations = core.work.len();
            core.work.clear();
            core.enlisted.clear();
            core.state = TransactionState::Committed;
            for stream in applied.unregistered {
                if let Err(err) = store.unregister(stream) {
                    error!(stream = %stream, error = %err, "failed to unregister removed stream");
                }
            }
            debug!(transaction = %core.id, operations, "transaction committed");
            store.publish(applied.events);
            Ok(())
        }
        Err(err) => {
            warn!(transaction = %core.id, error = %err, "commit failed, rolling back");
            rollback(Some(store), core);
            Err(err)
        }
    }
}

pub(crate) fn rollback(store: Option<&Arc<StoreInner>>, core: &mut TxCore) {
    let transaction = core.id;
    let operations = core.work.len();
    for work in core.work.drain(..).rev() {
        if let Err(err) = undo(store, &work, transaction) {
            error!(transaction = %transaction, error = %err, "rollback step failed");
        }
    }
    for (stream, lock) in core.enlisted.drain(..) {
        let Some(stream) = stream.upgrade() else {
            continue;
        };
        match stream.unlock_held_by(lock) {
            Ok(0) => {}
            Ok(released) => debug!(transaction = %transaction, lock = %lock, released, "enlisted locks released"),
            Err(err) => error!(transaction = %transaction, lock = %lock, error = %err, "failed to release enlisted locks"),
        }
    }
    core.state = TransactionState::RolledBack;
    debug!(transaction = %transaction, operations, "transaction rolled back");
}

struct Applied {
    events: Vec<StoreEvent>,
    unregistered: Vec<StreamId>,
}

fn apply(store: &Arc<StoreInner>, core: &TxCore) -> Result<Applied> {
    let persistence = store.persistence()?;
    let nodes = touched(&core.work);
    let mut locked = LockedStreams::acquire(&nodes)?;

    validate(&mut locked, core)?;
    let records = journal_records(&mut locked, &core.work)?;
    if !records.is_empty() {
        persistence.append(&records)?;
    }
    install(&mut locked, &core.work)
}

/// Every stream the work changes, once each, ordered by address.
fn touched(work: &[WorkItem]) -> Vec<Arc<StreamNode>> {
    let mut nodes: Vec<Arc<StreamNode>> = work
        .iter()
        .flat_map(|w| w.streams())
        .flatten()
        .cloned()
        .collect();
    nodes.sort_by_key(|node| Arc::as_ptr(node) as usize);
    nodes.dedup_by_key(|node| Arc::as_ptr(node) as usize);
    nodes
}

struct LockedStreams<'a> {
    entries: Vec<(usize, MutexGuard<'a, StreamState>)>,
}

impl<'a> LockedStreams<'a> {
    fn acquire(nodes: &'a [Arc<StreamNode>]) -> Result<Self> {
        let mut entries = Vec::with_capacity(nodes.len());
        for node in nodes {
            entries.push((Arc::as_ptr(node) as usize, node.lock()?));
        }
        Ok(Self { entries })
    }

    fn state(&mut self, node: &Arc<StreamNode>) -> Result<&mut StreamState> {
        let key = Arc::as_ptr(node) as usize;
        match self.entries.binary_search_by_key(&key, |(address, _)| *address) {
            Ok(index) => Ok(&mut self.entries[index].1),
            Err(_) => Err(StoreError::Severe(
                "commit touched a stream it did not lock".into(),
            )),
        }
    }
}

fn stream_id(node: &StreamNode) -> Result<StreamId> {
    node.id()
        .ok_or_else(|| StoreError::Severe("committed stream has no id".into()))
}

fn inconsistent(transaction: TransactionId, what: &str) -> StoreError {
    StoreError::Severe(format!(
        "transaction {} found {} in an unexpected state",
        transaction, what
    ))
}

fn validate(locked: &mut LockedStreams<'_>, core: &TxCore) -> Result<()> {
    let me = core.id;
    for work in &core.work {
        match work {
            WorkItem::AddItem { stream, sequence } => {
                let state = locked.state(stream)?;
                let pending = matches!(
                    state.items.get(sequence).map(|link| link.state),
                    Some(ItemState::Adding { transaction }) if transaction == me
                );
                if !pending {
                    return Err(inconsistent(me, "an added item"));
                }
                ensure_committed_container(state, stream, me)?;
            }
            WorkItem::RemoveItem { stream, sequence } => {
                let state = locked.state(stream)?;
                let pending = matches!(
                    state.items.get(sequence).map(|link| link.state),
                    Some(ItemState::Removing { transaction, .. }) if transaction == me
                );
                if !pending {
                    return Err(inconsistent(me, "a removed item"));
                }
            }
            WorkItem::AddStream { parent, child } => {
                let sequence = child.position();
                let linked = matches!(
                    locked.state(parent)?.children.get(&sequence),
                    Some(link) if Arc::ptr_eq(&link.node, child) && link.membership == Membership::Adding(me)
                );
                if !linked || locked.state(child)?.membership != Membership::Adding(me) {
                    return Err(inconsistent(me, "an added stream"));
                }
                ensure_committed_container(locked.state(parent)?, parent, me)?;
            }
            WorkItem::RemoveStream { parent, child } => {
                let sequence = child.position();
                let linked = matches!(
                    locked.state(parent)?.children.get(&sequence),
                    Some(link) if Arc::ptr_eq(&link.node, child) && link.membership == Membership::Removing(me)
                );
                let state = locked.state(child)?;
                if !linked || state.membership != Membership::Removing(me) {
                    return Err(inconsistent(me, "a removed stream"));
                }
                let items = state
                    .items
                    .values()
                    .filter(|link| {
                        !matches!(link.state, ItemState::Removing { transaction, .. } if transaction == me)
                    })
                    .count();
                let streams = state
                    .children
                    .values()
                    .filter(|link| link.membership != Membership::Removing(me))
                    .count();
                if items + streams > 0 {
                    return Err(TransactionError::StreamNotEmpty {
                        transaction: me,
                        stream: stream_id(child)?,
                        remaining: items + streams,
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}

/// A container may take new entries from a transaction only once its own
/// add has committed, or when that add belongs to the same transaction.
/// Otherwise a rollback of the container's add would strand them.
fn ensure_committed_container(state: &StreamState, node: &StreamNode, me: TransactionId) -> Result<()> {
    match state.membership {
        Membership::Registered | Membership::Removing(_) => Ok(()),
        Membership::Adding(owner) if owner == me => Ok(()),
        _ => Err(TransactionError::StreamNotCommitted {
            transaction: me,
            stream: stream_id(node)?,
        }
        .into()),
    }
}

fn journal_records(locked: &mut LockedStreams<'_>, work: &[WorkItem]) -> Result<Vec<JournalRecord>> {
    let mut records = Vec::new();
    for step in work {
        match step {
            WorkItem::AddItem { stream, sequence } => {
                let id = stream_id(stream)?;
                if let Some(link) = locked.state(stream)?.items.get(sequence) {
                    if link.storage == StorageStrategy::Always {
                        records.push(JournalRecord::ItemAdded {
                            item: link.id,
                            stream: id,
                            sequence: link.sequence,
                            priority: link.priority,
                            payload: link.payload.clone(),
                        });
                    }
                }
            }
            WorkItem::RemoveItem { stream, sequence } => {
                let id = stream_id(stream)?;
                if let Some(link) = locked.state(stream)?.items.get(sequence) {
                    if link.storage == StorageStrategy::Always {
                        records.push(JournalRecord::ItemRemoved {
                            item: link.id,
                            stream: id,
                        });
                    }
                }
            }
            WorkItem::AddStream { parent, child } => {
                if child.storage() == StorageStrategy::Always {
                    let parent = stream_id(parent)?;
                    records.push(JournalRecord::StreamAdded {
                        stream: stream_id(child)?,
                        parent: (!parent.is_root()).then_some(parent),
                        max_items: child.max_items(),
                    });
                }
            }
            WorkItem::RemoveStream { child, .. } => {
                if child.storage() == StorageStrategy::Always {
                    records.push(JournalRecord::StreamRemoved {
                        stream: stream_id(child)?,
                    });
                }
            }
        }
    }
    Ok(records)
}

fn install(locked: &mut LockedStreams<'_>, work: &[WorkItem]) -> Result<Applied> {
    let mut applied = Applied {
        events: Vec::new(),
        unregistered: Vec::new(),
    };
    for step in work {
        match step {
            WorkItem::AddItem { stream, sequence } => {
                let id = stream_id(stream)?;
                let state = locked.state(stream)?;
                if let Some(link) = state.items.get_mut(sequence) {
                    link.state = ItemState::Available;
                    applied.events.push(StoreEvent::item_added(id, link.id));
                    state.stats.add_committed();
                }
            }
            WorkItem::RemoveItem { stream, sequence } => {
                let id = stream_id(stream)?;
                let state = locked.state(stream)?;
                if let Some(link) = state.items.remove(sequence) {
                    state.index.remove(&link.id);
                    state.stats.remove_committed();
                    applied.events.push(StoreEvent::item_removed(id, link.id));
                }
            }
            WorkItem::AddStream { parent, child } => {
                let id = stream_id(child)?;
                if let Some(link) = locked.state(parent)?.children.get_mut(&child.position()) {
                    link.membership = Membership::Registered;
                }
                locked.state(child)?.membership = Membership::Registered;
                applied.events.push(StoreEvent::stream_added(id));
            }
            WorkItem::RemoveStream { parent, child } => {
                let id = stream_id(child)?;
                locked.state(parent)?.children.remove(&child.position());
                locked.state(child)?.membership = Membership::Removed;
                applied.unregistered.push(id);
                applied.events.push(StoreEvent::stream_removed(id));
            }
        }
    }
    Ok(applied)
}

fn undo(store: Option<&Arc<StoreInner>>, work: &WorkItem, me: TransactionId) -> Result<()> {
    match work {
        WorkItem::AddItem { stream, sequence } => {
            let mut guard = stream.lock()?;
            let state = &mut *guard;
            let pending = matches!(
                state.items.get(sequence).map(|link| link.state),
                Some(ItemState::Adding { transaction }) if transaction == me
            );
            if pending {
                if let Some(link) = state.items.remove(sequence) {
                    state.index.remove(&link.id);
                }
                state.stats.add_rolled_back();
            }
        }
        WorkItem::RemoveItem { stream, sequence } => {
            let mut guard = stream.lock()?;
            let state = &mut *guard;
            if let Some(link) = state.items.get_mut(sequence) {
                if let ItemState::Removing { transaction, lock } = link.state {
                    if transaction == me {
                        link.state = ItemState::Available;
                        if !lock.is_none() {
                            link.unlock_count += 1;
                        }
                        state.stats.remove_rolled_back();
                    }
                }
            }
        }
        WorkItem::AddStream { parent, child } => {
            {
                let mut state = child.lock()?;
                if state.membership == Membership::Adding(me) {
                    state.membership = Membership::Unregistered;
                    state.attachment = None;
                }
            }
            {
                let mut state = parent.lock()?;
                let sequence = child.position();
                let pending = matches!(
                    state.children.get(&sequence),
                    Some(link) if Arc::ptr_eq(&link.node, child) && link.membership == Membership::Adding(me)
                );
                if pending {
                    state.children.remove(&sequence);
                }
            }
            if let (Some(store), Some(id)) = (store, child.id()) {
                store.unregister(id)?;
            }
        }
        WorkItem::RemoveStream { parent, child } => {
            {
                let mut state = parent.lock()?;
                if let Some(link) = state.children.get_mut(&child.position()) {
                    if Arc::ptr_eq(&link.node, child) && link.membership == Membership::Removing(me) {
                        link.membership = Membership::Registered;
                    }
                }
            }
            let mut state = child.lock()?;
            if state.membership == Membership::Removing(me) {
                state.membership = Membership::Registered;
            }
        }
    }
    Ok(())
}
