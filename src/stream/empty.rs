use tracing::{debug, warn};

use super::ItemStream;
use crate::cursor::LockingCursor;
use crate::error::{Result, StoreError};
use crate::filter::Filter;
use crate::transaction::{Transaction, TransactionFactory, TransactionState};

/// How a run of batched removals ended.
#[derive(Debug)]
enum BatchOutcome {
    /// No available item was left.
    Completed(usize),
    /// A batch hit a resource limit and was rolled back.
    Exhausted { removed: usize, cause: StoreError },
}

impl ItemStream {
    /// Remove every available item, returning how many were removed.
    ///
    /// Items are removed in local transactions of the configured batch
    /// size. If a batch runs out of resources it is rolled back and the
    /// rest of the stream is drained one auto-commit removal at a time.
    /// Items locked by other cursors are skipped.
    pub fn empty(&self) -> Result<usize> {
        let store = self.node.store()?;
        let factory = TransactionFactory::new(store.clone());
        let batch_size = store.config.empty_batch_size.max(1);

        match self.empty_in_batches(&factory, batch_size)? {
            BatchOutcome::Completed(removed) => {
                debug!(stream = ?self.id(), removed, "stream emptied");
                Ok(removed)
            }
            BatchOutcome::Exhausted { removed, cause } => {
                warn!(
                    stream = ?self.id(),
                    batch_size,
                    error = %cause,
                    "batched empty ran out of resources, continuing one item at a time"
                );
                let remaining = self.empty_one_at_a_time(&factory)?;
                Ok(removed + remaining)
            }
        }
    }

    fn empty_in_batches(&self, factory: &TransactionFactory, batch_size: usize) -> Result<BatchOutcome> {
        let mut removed = 0;
        loop {
            let transaction = factory.create_local_transaction();
            let mut cursor = self.new_locking_cursor(Filter::All)?;
            let attempt = remove_batch(&mut cursor, &transaction, batch_size)
                .and_then(|count| transaction.commit().map(|()| count));

            let count = match attempt {
                Ok(count) => {
                    cursor.unlock_all()?;
                    count
                }
                Err(cause) => {
                    if transaction.state()? == TransactionState::Active {
                        transaction.rollback()?;
                    }
                    cursor.unlock_all()?;
                    if cause.is_resource_exhaustion() {
                        return Ok(BatchOutcome::Exhausted { removed, cause });
                    }
                    return Err(cause);
                }
            };
            removed += count;
            if count < batch_size {
                return Ok(BatchOutcome::Completed(removed));
            }
        }
    }

    fn empty_one_at_a_time(&self, factory: &TransactionFactory) -> Result<usize> {
        let auto = factory.create_auto_commit_transaction();
        let mut removed = 0;
        while self
            .remove_first_matching_item(&Filter::All, &auto)?
            .is_some()
        {
            removed += 1;
        }
        Ok(removed)
    }
}

fn remove_batch(cursor: &mut LockingCursor, transaction: &Transaction, batch_size: usize) -> Result<usize> {
    let mut count = 0;
    while count < batch_size {
        let Some(item) = cursor.next()? else {
            break;
        };
        item.remove(transaction, cursor.lock_id())?;
        count += 1;
    }
    Ok(count)
}
