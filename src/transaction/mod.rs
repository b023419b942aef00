mod commit;
mod factory;
mod transaction;
mod work;

pub use factory::TransactionFactory;
pub use transaction::{Transaction, TransactionId, TransactionState};
pub(crate) use transaction::TxCore;
pub(crate) use work::WorkItem;
