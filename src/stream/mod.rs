mod empty;
mod item_stream;
mod node;

pub use item_stream::{ItemStream, ItemStreamBuilder, StreamId};
pub(crate) use node::{Membership, StreamNode, StreamState};
