use std::fmt::Display;
use std::sync::mpsc::{channel, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use super::DrainWorker;
use crate::item::StoredItem;

/// Statistics from a drain worker thread.
#[derive(Debug, Default, Clone)]
pub struct DrainStats {
    pub items_processed: usize,
    pub items_failed: usize,
    pub polls: usize,
    pub errors: usize,
}

/// A background thread running a [`DrainWorker`] until stopped.
///
/// ```ignore
/// let worker = DrainWorker::new(stream)
///     .with_batch_size(10)
///     .spawn(|item: &StoredItem| deliver(item.payload()));
///
/// // ... do work ...
///
/// let stats = worker.stop();
/// println!("processed {} items", stats.items_processed);
/// ```
pub struct DrainWorkerThread {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<DrainStats>>,
}

impl DrainWorker {
    /// Run the worker on its own thread.
    ///
    /// The thread drains batches back to back while there is work and
    /// sleeps for the poll interval whenever a batch removes nothing or
    /// fails.
    pub fn spawn<F, E>(self, mut handler: F) -> DrainWorkerThread
    where
        F: FnMut(&StoredItem) -> Result<(), E> + Send + 'static,
        E: Display + 'static,
    {
        let (stop_tx, stop_rx) = channel();

        let handle = thread::spawn(move || {
            let mut stats = DrainStats::default();

            loop {
                match stop_rx.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => break,
                    Err(TryRecvError::Empty) => {}
                }

                stats.polls += 1;

                let idle = match self.run_once(&mut handler) {
                    Ok(report) => {
                        stats.items_processed += report.processed;
                        stats.items_failed += report.failed;
                        report.processed == 0
                    }
                    Err(err) => {
                        warn!(worker = %self.name, error = %err, "drain batch failed");
                        stats.errors += 1;
                        true
                    }
                };

                if idle {
                    thread::sleep(self.poll_interval);
                }
            }

            info!(
                worker = %self.name,
                processed = stats.items_processed,
                failed = stats.items_failed,
                "drain worker stopped"
            );
            stats
        });

        DrainWorkerThread {
            stop_tx,
            handle: Some(handle),
        }
    }
}

impl DrainWorkerThread {
    /// Signal the worker to stop and wait for it to finish.
    /// Returns the worker statistics.
    pub fn stop(mut self) -> DrainStats {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap_or_default()
        } else {
            DrainStats::default()
        }
    }

    /// Signal the worker to stop without waiting.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(());
    }
}

impl Drop for DrainWorkerThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}
