use std::sync::Arc;

use super::Transaction;
use crate::store::StoreInner;

/// Hands out transactions bound to one message store.
#[derive(Clone)]
pub struct TransactionFactory {
    store: Arc<StoreInner>,
}

impl TransactionFactory {
    pub(crate) fn new(store: Arc<StoreInner>) -> Self {
        Self { store }
    }

    /// A transaction that commits every operation as soon as it completes.
    pub fn create_auto_commit_transaction(&self) -> Transaction {
        Transaction::auto_commit(&self.store)
    }

    /// A transaction whose operations take effect together on commit.
    pub fn create_local_transaction(&self) -> Transaction {
        Transaction::local(&self.store)
    }
}

impl std::fmt::Debug for TransactionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionFactory").finish_non_exhaustive()
    }
}
