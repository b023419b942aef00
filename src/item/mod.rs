mod item;
mod link;
mod stored;

pub use item::{Item, ItemId, LockId, StorageStrategy};
pub(crate) use link::ItemLink;
pub use link::ItemState;
pub use stored::StoredItem;
