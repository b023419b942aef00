use std::sync::Arc;

use crate::stream::StreamNode;

/// One recorded operation, replayed forwards on commit and backwards on
/// rollback.
pub(crate) enum WorkItem {
    AddItem {
        stream: Arc<StreamNode>,
        sequence: u64,
    },
    RemoveItem {
        stream: Arc<StreamNode>,
        sequence: u64,
    },
    AddStream {
        parent: Arc<StreamNode>,
        child: Arc<StreamNode>,
    },
    RemoveStream {
        parent: Arc<StreamNode>,
        child: Arc<StreamNode>,
    },
}

impl WorkItem {
    /// Streams whose state the operation changes.
    pub(crate) fn streams(&self) -> [Option<&Arc<StreamNode>>; 2] {
        match self {
            WorkItem::AddItem { stream, .. } | WorkItem::RemoveItem { stream, .. } => {
                [Some(stream), None]
            }
            WorkItem::AddStream { parent, child } | WorkItem::RemoveStream { parent, child } => {
                [Some(parent), Some(child)]
            }
        }
    }
}
