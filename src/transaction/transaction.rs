use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::commit;
use super::work::WorkItem;
use crate::error::{Result, StoreError, TransactionError};
use crate::item::LockId;
use crate::store::StoreInner;
use crate::stream::StreamNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "active"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    AutoCommit,
    Local,
}

/// Work recorded by one unit of work, in the order it was performed.
pub(crate) struct TxCore {
    pub(crate) id: TransactionId,
    pub(crate) state: TransactionState,
    pub(crate) work: Vec<WorkItem>,
    pub(crate) enlisted: Vec<(Weak<StreamNode>, LockId)>,
    limit: usize,
}

impl TxCore {
    fn new(id: TransactionId, limit: usize) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            work: Vec::new(),
            enlisted: Vec::new(),
            limit,
        }
    }

    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }

    /// Fail before any state changes if one more operation would exceed
    /// the transaction size limit.
    pub(crate) fn reserve(&self) -> Result<()> {
        if self.work.len() >= self.limit {
            return Err(StoreError::OutOfCacheSpace {
                transaction: self.id,
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub(crate) fn record(&mut self, work: WorkItem) {
        self.work.push(work);
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(TransactionError::NotActive {
                transaction: self.id,
                state: self.state,
            }
            .into());
        }
        Ok(())
    }
}

struct TransactionInner {
    id: TransactionId,
    kind: Kind,
    store: Weak<StoreInner>,
    core: Mutex<TxCore>,
}

/// A unit of work against the store.
///
/// Auto-commit transactions commit each operation as it completes. Local
/// transactions collect operations until [`commit`](Transaction::commit)
/// or [`rollback`](Transaction::rollback). Handles are cheap to clone and
/// all clones refer to the same unit of work.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn auto_commit(store: &Arc<StoreInner>) -> Self {
        Self::build(store, Kind::AutoCommit)
    }

    pub(crate) fn local(store: &Arc<StoreInner>) -> Self {
        Self::build(store, Kind::Local)
    }

    fn build(store: &Arc<StoreInner>, kind: Kind) -> Self {
        let id = store.ids.next_transaction();
        Self {
            inner: Arc::new(TransactionInner {
                id,
                kind,
                store: Arc::downgrade(store),
                core: Mutex::new(TxCore::new(id, store.config.max_transaction_size)),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn is_auto_commit(&self) -> bool {
        self.inner.kind == Kind::AutoCommit
    }

    pub fn state(&self) -> Result<TransactionState> {
        Ok(self.core()?.state)
    }

    /// Number of operations recorded and not yet committed.
    pub fn pending_operations(&self) -> Result<usize> {
        Ok(self.core()?.work.len())
    }

    /// Make every recorded operation permanent.
    ///
    /// If any journal write or removal check fails the whole transaction is
    /// rolled back and the error returned.
    pub fn commit(&self) -> Result<()> {
        if self.is_auto_commit() {
            return Err(TransactionError::AutoCommitBoundary.into());
        }
        let mut core = self.core()?;
        core.ensure_active()?;
        match self.inner.store.upgrade() {
            Some(store) => commit::commit(&store, &mut core),
            None => {
                commit::rollback(None, &mut core);
                Err(StoreError::StoreNotStarted)
            }
        }
    }

    /// Undo every recorded operation.
    pub fn rollback(&self) -> Result<()> {
        if self.is_auto_commit() {
            return Err(TransactionError::AutoCommitBoundary.into());
        }
        let mut core = self.core()?;
        core.ensure_active()?;
        let store = self.inner.store.upgrade();
        commit::rollback(store.as_ref(), &mut core);
        Ok(())
    }

    /// Run one operation inside this transaction.
    ///
    /// For a local transaction the operation records its work in the shared
    /// core. For an auto-commit transaction it gets a private core that is
    /// committed as soon as the operation returns.
    pub(crate) fn execute<T>(&self, operation: impl FnOnce(&mut TxCore) -> Result<T>) -> Result<T> {
        match self.inner.kind {
            Kind::Local => {
                let mut core = self.core()?;
                core.ensure_active()?;
                operation(&mut core)
            }
            Kind::AutoCommit => {
                let store = self
                    .inner
                    .store
                    .upgrade()
                    .ok_or(StoreError::StoreNotStarted)?;
                let mut core = TxCore::new(
                    store.ids.next_transaction(),
                    store.config.max_transaction_size,
                );
                match operation(&mut core) {
                    Ok(value) => {
                        commit::commit(&store, &mut core)?;
                        Ok(value)
                    }
                    Err(err) => {
                        trace!(transaction = %core.id, error = %err, "auto-commit operation failed");
                        commit::rollback(Some(&store), &mut core);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Release `lock` on every item in `stream` if this transaction rolls
    /// back. Auto-commit transactions have nothing to roll back, so the
    /// request is ignored for them.
    pub(crate) fn enlist(&self, stream: &Arc<StreamNode>, lock: LockId) -> Result<()> {
        if self.is_auto_commit() {
            return Ok(());
        }
        let mut core = self.core()?;
        core.ensure_active()?;
        if !core
            .enlisted
            .iter()
            .any(|(node, held)| *held == lock && node.as_ptr() == Arc::as_ptr(stream))
        {
            debug!(transaction = %core.id, lock = %lock, "cursor lock enlisted");
            core.enlisted.push((Arc::downgrade(stream), lock));
        }
        Ok(())
    }

    fn core(&self) -> Result<MutexGuard<'_, TxCore>> {
        self.inner
            .core
            .lock()
            .map_err(|_| StoreError::LockPoisoned("transaction"))
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if self.kind != Kind::Local {
            return;
        }
        let Ok(core) = self.core.get_mut() else {
            return;
        };
        if core.state == TransactionState::Active
            && (!core.work.is_empty() || !core.enlisted.is_empty())
        {
            warn!(
                transaction = %core.id,
                operations = core.work.len(),
                "local transaction dropped while active, rolling back"
            );
            let store = self.store.upgrade();
            commit::rollback(store.as_ref(), core);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("auto_commit", &self.is_auto_commit())
            .finish()
    }
}
