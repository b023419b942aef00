//! Rebuilding persistent streams and items from the journal on start.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};

use tracing::warn;

use super::StoreInner;
use crate::error::Result;
use crate::item::{ItemId, StorageStrategy};
use crate::persistence::JournalRecord;
use crate::stream::{StreamId, StreamNode};

pub(crate) struct Recovered {
    pub streams: HashMap<StreamId, Weak<StreamNode>>,
    pub items: usize,
    /// Minimal journal describing the recovered state.
    pub records: Vec<JournalRecord>,
}

struct RecoveredStream {
    parent: Option<StreamId>,
    max_items: Option<usize>,
}

struct RecoveredItem {
    stream: StreamId,
    sequence: u64,
    priority: u8,
    payload: Vec<u8>,
}

/// Replay `records` under `root`.
///
/// Streams are rebuilt parents first and items in their original sequence
/// order. Entries whose container did not survive are dropped with a
/// warning.
pub(crate) fn rebuild(
    store: &Arc<StoreInner>,
    root: &Arc<StreamNode>,
    epoch: u64,
    records: Vec<JournalRecord>,
) -> Result<Recovered> {
    let mut streams: BTreeMap<StreamId, RecoveredStream> = BTreeMap::new();
    let mut items: BTreeMap<ItemId, RecoveredItem> = BTreeMap::new();
    let mut highest = 0;

    for record in records {
        highest = highest.max(record.highest_id());
        match record {
            JournalRecord::StreamAdded {
                stream,
                parent,
                max_items,
            } => {
                streams.insert(stream, RecoveredStream { parent, max_items });
            }
            JournalRecord::StreamRemoved { stream } => {
                streams.remove(&stream);
            }
            JournalRecord::ItemAdded {
                item,
                stream,
                sequence,
                priority,
                payload,
            } => {
                items.insert(
                    item,
                    RecoveredItem {
                        stream,
                        sequence,
                        priority,
                        payload,
                    },
                );
            }
            JournalRecord::ItemRemoved { item, .. } => {
                items.remove(&item);
            }
        }
    }
    store.ids.advance_past(highest);

    let weak_store = Arc::downgrade(store);
    let mut nodes: HashMap<StreamId, Arc<StreamNode>> = HashMap::new();
    let mut live = Vec::new();
    for (id, stream) in placement_order(&streams) {
        let parent = match stream.parent {
            None => Arc::clone(root),
            Some(parent) => match nodes.get(&parent) {
                Some(node) => Arc::clone(node),
                None => {
                    warn!(stream = %id, parent = %parent, "dropping recovered stream whose parent is gone");
                    continue;
                }
            },
        };
        let node = Arc::new(StreamNode::new(StorageStrategy::Always, stream.max_items));
        parent.recover_child(&node, id, &weak_store, epoch)?;
        nodes.insert(id, node);
        live.push(JournalRecord::StreamAdded {
            stream: id,
            parent: stream.parent,
            max_items: stream.max_items,
        });
    }

    let mut ordered: Vec<(ItemId, RecoveredItem)> = items.into_iter().collect();
    ordered.sort_by_key(|(_, item)| (item.stream, item.sequence));
    let mut recovered_items = 0;
    for (id, item) in ordered {
        let Some(node) = nodes.get(&item.stream) else {
            warn!(item = %id, stream = %item.stream, "dropping recovered item whose stream is gone");
            continue;
        };
        live.push(JournalRecord::ItemAdded {
            item: id,
            stream: item.stream,
            sequence: item.sequence,
            priority: item.priority,
            payload: item.payload.clone(),
        });
        node.recover_item(id, item.sequence, item.priority, item.payload)?;
        recovered_items += 1;
    }

    Ok(Recovered {
        streams: nodes
            .iter()
            .map(|(id, node)| (*id, Arc::downgrade(node)))
            .collect(),
        items: recovered_items,
        records: live,
    })
}

/// Streams ordered so that each comes after its parent.
///
/// A stream keeps the id it was first given even if that add rolled back,
/// so a child can carry a lower id than the parent it was committed under.
/// Streams whose parent never appears come last, in id order.
fn placement_order(
    streams: &BTreeMap<StreamId, RecoveredStream>,
) -> Vec<(StreamId, &RecoveredStream)> {
    let mut placed: HashSet<StreamId> = HashSet::with_capacity(streams.len());
    let mut order = Vec::with_capacity(streams.len());
    let mut pending: Vec<(StreamId, &RecoveredStream)> =
        streams.iter().map(|(id, stream)| (*id, stream)).collect();

    loop {
        let before = pending.len();
        pending.retain(|(id, stream)| {
            let ready = stream.parent.map_or(true, |parent| placed.contains(&parent));
            if ready {
                placed.insert(*id);
                order.push((*id, *stream));
            }
            !ready
        });
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }
    order.extend(pending);
    order
}
