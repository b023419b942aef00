use std::fmt::Display;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cursor::LockingCursor;
use crate::error::Result;
use crate::filter::Filter;
use crate::item::StoredItem;
use crate::stream::ItemStream;
use crate::transaction::{Transaction, TransactionFactory, TransactionState};

/// Outcome of one drained batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Items the handler accepted; they were removed.
    pub processed: usize,
    /// Items the handler rejected; they were unlocked for redelivery.
    pub failed: usize,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.failed == 0
    }
}

/// Hands a stream's items to a handler and removes the ones it accepts.
///
/// Each batch locks up to `batch_size` items with a locking cursor, so
/// several workers on one stream never see the same item at once. Accepted
/// items are removed in one local transaction per batch. Rejected items are
/// unlocked and picked up again by a later batch.
#[derive(Debug, Clone)]
pub struct DrainWorker {
    pub(crate) stream: ItemStream,
    pub(crate) filter: Filter,
    pub(crate) batch_size: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) name: String,
}

impl DrainWorker {
    pub fn new(stream: ItemStream) -> Self {
        Self {
            stream,
            filter: Filter::All,
            batch_size: 100,
            poll_interval: Duration::from_millis(50),
            name: "drain-worker".to_string(),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// How long the background thread waits after a batch that found
    /// nothing to do.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain one batch on the calling thread.
    pub fn run_once<F, E>(&self, handler: &mut F) -> Result<BatchReport>
    where
        F: FnMut(&StoredItem) -> std::result::Result<(), E>,
        E: Display,
    {
        let factory = TransactionFactory::new(self.stream.node.store()?);
        let transaction = factory.create_local_transaction();
        let mut cursor = self.stream.new_locking_cursor(self.filter.clone())?;
        cursor.enlist(&transaction)?;

        let outcome = self
            .process(&mut cursor, &transaction, handler)
            .and_then(|report| transaction.commit().map(|()| report));
        match outcome {
            Ok(report) => {
                if !report.is_empty() {
                    debug!(worker = %self.name, processed = report.processed, failed = report.failed, "batch drained");
                }
                Ok(report)
            }
            Err(err) => {
                if transaction.state()? == TransactionState::Active {
                    transaction.rollback()?;
                }
                cursor.unlock_all()?;
                Err(err)
            }
        }
    }

    fn process<F, E>(
        &self,
        cursor: &mut LockingCursor,
        transaction: &Transaction,
        handler: &mut F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&StoredItem) -> std::result::Result<(), E>,
        E: Display,
    {
        let mut report = BatchReport::default();
        while report.processed + report.failed < self.batch_size {
            let Some(item) = cursor.next()? else {
                break;
            };
            match handler(&item) {
                Ok(()) => {
                    item.remove(transaction, cursor.lock_id())?;
                    report.processed += 1;
                }
                Err(err) => {
                    warn!(worker = %self.name, item = %item.id(), error = %err, "handler failed, releasing item");
                    item.unlock(cursor.lock_id())?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}
