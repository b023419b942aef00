//! Predicates selecting which items or streams a find, remove or cursor
//! should consider.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::item::ItemId;
use crate::stream::StreamId;

/// What a filter can see of an item or a stream.
pub trait Filterable {
    /// Store-unique id of the entry.
    fn filter_id(&self) -> u64;

    /// Position of the entry in its container.
    fn filter_sequence(&self) -> u64;

    fn filter_priority(&self) -> u8 {
        0
    }

    fn filter_payload(&self) -> Option<&[u8]> {
        None
    }
}

type Predicate = dyn Fn(&dyn Filterable) -> Result<bool> + Send + Sync;

#[derive(Clone, Default)]
pub enum Filter {
    /// Matches everything.
    #[default]
    All,
    /// Matches entries whose sequence is a multiple of the factor.
    /// A factor of 0 matches everything.
    Skip(u64),
    /// Matches the single entry with this id.
    Identity(u64),
    /// Matches entries tagged with this priority.
    Priority(u8),
    Custom(Arc<Predicate>),
}

impl Filter {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&dyn Filterable) -> Result<bool> + Send + Sync + 'static,
    {
        Filter::Custom(Arc::new(predicate))
    }

    pub fn item(id: ItemId) -> Self {
        Filter::Identity(id.0)
    }

    pub fn stream(id: StreamId) -> Self {
        Filter::Identity(id.0)
    }

    pub fn matches(&self, entry: &dyn Filterable) -> Result<bool> {
        match self {
            Filter::All => Ok(true),
            Filter::Skip(0) => Ok(true),
            Filter::Skip(factor) => Ok(entry.filter_sequence() % factor == 0),
            Filter::Identity(id) => Ok(entry.filter_id() == *id),
            Filter::Priority(priority) => Ok(entry.filter_priority() == *priority),
            Filter::Custom(predicate) => predicate(entry),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "All"),
            Filter::Skip(factor) => write!(f, "Skip({})", factor),
            Filter::Identity(id) => write!(f, "Identity({})", id),
            Filter::Priority(priority) => write!(f, "Priority({})", priority),
            Filter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
