mod ids;
mod inner;
mod message_store;
mod recovery;

pub(crate) use inner::StoreInner;
pub use message_store::MessageStore;
