//! Single-slot FIFO execution queue
//!
//! Each source owns one [`SerialQueue`]. Operations start strictly in the
//! order they were enqueued, and the next one starts only after the current
//! one reports `Finished` on its lifecycle channel. Different queues run
//! independently on the shared Tokio runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{Operation, TaskState};

type Tracked = Arc<Mutex<Vec<(u64, Arc<dyn Operation>)>>>;

/// Queue allowing at most one in-flight operation
pub struct SerialQueue {
    label: String,
    tx: mpsc::UnboundedSender<(u64, Arc<dyn Operation>)>,
    tracked: Tracked,
    next_id: AtomicU64,
}

impl SerialQueue {
    /// Create a queue and spawn its worker
    ///
    /// Must be called from within a Tokio runtime. The worker exits when the
    /// queue is dropped and every queued operation has been drained.
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let tracked: Tracked = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(run_worker(label.clone(), rx, Arc::clone(&tracked)));

        Self {
            label,
            tx,
            tracked,
            next_id: AtomicU64::new(0),
        }
    }

    /// Queue label (for logging)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append an operation; it starts once everything ahead of it finished
    pub fn enqueue(&self, operation: Arc<dyn Operation>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_tracked().push((id, Arc::clone(&operation)));

        trace!(queue = %self.label, operation = operation.name(), "enqueued");
        if let Err(mpsc::error::SendError((_, operation))) = self.tx.send((id, operation)) {
            // Worker is gone (runtime shutting down); make sure waiters are released.
            warn!(queue = %self.label, operation = operation.name(), "queue worker stopped, cancelling operation");
            self.untrack(id);
            operation.cancel();
            operation.launch();
        }
    }

    /// Cancel every operation that has not finished yet, in one pass
    ///
    /// Queued operations finish immediately without running; the in-flight
    /// operation finishes once its work observes cancellation.
    pub fn cancel_all_operations(&self) {
        let operations: Vec<Arc<dyn Operation>> = self
            .lock_tracked()
            .iter()
            .map(|(_, op)| Arc::clone(op))
            .collect();

        if !operations.is_empty() {
            debug!(queue = %self.label, count = operations.len(), "cancelling all operations");
        }
        for operation in operations {
            operation.cancel();
        }
    }

    /// Number of operations queued or executing
    pub fn operation_count(&self) -> usize {
        self.lock_tracked().len()
    }

    fn untrack(&self, id: u64) {
        self.lock_tracked().retain(|(tracked_id, _)| *tracked_id != id);
    }

    fn lock_tracked(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Arc<dyn Operation>)>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_worker(
    label: String,
    mut rx: mpsc::UnboundedReceiver<(u64, Arc<dyn Operation>)>,
    tracked: Tracked,
) {
    while let Some((id, operation)) = rx.recv().await {
        let mut lifecycle = operation.subscribe();
        trace!(queue = %label, operation = operation.name(), "starting");
        Arc::clone(&operation).launch();

        // Sender lives in the operation we hold, so this only returns once finished.
        let _ = lifecycle
            .wait_for(|status| status.state == TaskState::Finished)
            .await;

        tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(tracked_id, _)| *tracked_id != id);
        trace!(queue = %label, operation = operation.name(), "finished");
    }
    debug!(queue = %label, "queue worker stopped");
}
