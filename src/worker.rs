//! Background execution: a bounded worker pool, cancellation tokens, the
//! catalog writer lock and progress reporting.

use crate::error::{AppError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use uuid::Uuid;

/// Cooperative cancellation flag shared between a task and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(AppError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AppError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Single writer lock serializing filesystem+catalog mutations.
///
/// Every import or bulk item holds it for its whole two-step mutation, so two
/// operations never interleave on the same document.
#[derive(Debug, Clone, Default)]
pub struct WriterLock {
    inner: Arc<Mutex<()>>,
}

impl WriterLock {
    /// Create an unlocked writer lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is held.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock()
    }
}

/// Progress notification emitted by background operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Operation started over `total` items.
    Started {
        /// Operation ID.
        operation: Uuid,
        /// Item count.
        total: usize,
    },
    /// An item is being processed.
    Item {
        /// Operation ID.
        operation: Uuid,
        /// 1-based position.
        index: usize,
        /// Item count.
        total: usize,
        /// Display name of the item.
        name: String,
    },
    /// Operation finished.
    Finished {
        /// Operation ID.
        operation: Uuid,
        /// One-line summary.
        summary: String,
    },
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn report(&self, event: ProgressEvent);
}

/// Sink discarding every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _event: ProgressEvent) {}
}

/// Sink forwarding events to the foreground over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ProgressEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver the foreground drains.
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn report(&self, event: ProgressEvent) {
        // A closed receiver means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}

/// Result of one batch item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Both steps succeeded.
    Done,
    /// Nothing to do (duplicate, missing file, already removed).
    Skipped(String),
    /// The item failed and any partial change was undone.
    Failed(String),
    /// The item failed and the compensating step failed too; catalog and
    /// filesystem disagree for this document.
    Drift(String),
    /// The batch was cancelled before reaching this item.
    NotProcessed,
}

/// Per-item entry of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// Display name (file name or source path).
    pub name: String,
    /// Document concerned, when known.
    pub document_id: Option<i64>,
    /// What happened.
    pub outcome: ItemOutcome,
}

impl ItemReport {
    /// Successful item.
    pub fn done(name: impl Into<String>, document_id: i64) -> Self {
        Self {
            name: name.into(),
            document_id: Some(document_id),
            outcome: ItemOutcome::Done,
        }
    }

    /// Skipped item.
    pub fn skipped(name: impl Into<String>, document_id: Option<i64>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            document_id,
            outcome: ItemOutcome::Skipped(reason.into()),
        }
    }

    /// Failed item.
    pub fn failed(name: impl Into<String>, document_id: Option<i64>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            document_id,
            outcome: ItemOutcome::Failed(error.into()),
        }
    }

    /// Item left in an inconsistent state.
    pub fn drift(name: impl Into<String>, document_id: Option<i64>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            document_id,
            outcome: ItemOutcome::Drift(detail.into()),
        }
    }
}

/// Summary of a batch, always produced even when items fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Operation ID.
    pub operation: Uuid,
    /// Items in processing order.
    pub items: Vec<ItemReport>,
    /// Whether the batch stopped on cancellation.
    pub cancelled: bool,
}

impl BatchReport {
    /// Empty report for an operation.
    pub fn new(operation: Uuid) -> Self {
        Self {
            operation,
            items: Vec::new(),
            cancelled: false,
        }
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.outcome)).count()
    }

    /// Items that completed.
    pub fn completed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Done))
    }

    /// Items skipped.
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped(_)))
    }

    /// Items that failed cleanly.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    /// Items left inconsistent.
    pub fn drifted(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Drift(_)))
    }

    /// Items never reached.
    pub fn not_processed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::NotProcessed))
    }

    /// Documents whose item completed.
    pub fn completed_ids(&self) -> Vec<i64> {
        self.items
            .iter()
            .filter(|i| i.outcome == ItemOutcome::Done)
            .filter_map(|i| i.document_id)
            .collect()
    }

    /// One-line summary.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} done, {} skipped, {} failed",
            self.completed(),
            self.skipped(),
            self.failed()
        );
        if self.drifted() > 0 {
            summary.push_str(&format!(", {} inconsistent", self.drifted()));
        }
        if self.cancelled {
            summary.push_str(&format!(", cancelled ({} not processed)", self.not_processed()));
        }
        summary
    }
}

/// Handle to a submitted task.
pub struct TaskHandle<T> {
    id: Uuid,
    token: CancellationToken,
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Task ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The task's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cancellation; the task stops before its next item.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Result if the task already finished.
    pub fn try_join(&self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(value) => Ok(Some(value)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(AppError::Internal(format!("Task {} terminated abnormally", self.id)))
            }
        }
    }

    /// Block until the task finishes.
    pub fn join(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| AppError::Internal(format!("Task {} terminated abnormally", self.id)))
    }
}

/// Releases a pending slot when the task ends, even on panic.
struct PendingSlot(Arc<AtomicUsize>);

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded pool running background operations.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<rayon::ThreadPool>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl WorkerPool {
    /// Create a pool with `threads` workers accepting at most `max_pending`
    /// queued or running tasks.
    pub fn new(threads: usize, max_pending: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("doclib-worker-{}", i))
            .panic_handler(|_| tracing::error!("Background task panicked"))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build worker pool: {}", e)))?;

        Ok(Self {
            pool: Arc::new(pool),
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: max_pending.max(1),
        })
    }

    /// Number of queued or running tasks.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a task. Fails with `AppError::Busy` when the queue is full.
    pub fn submit<T, F>(&self, task: F) -> Result<TaskHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
    {
        let max = self.max_pending;
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .map_err(|_| AppError::Busy(max))?;
        let slot = PendingSlot(Arc::clone(&self.pending));

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let task_token = token.clone();
        let (tx, rx) = mpsc::channel();

        self.pool.spawn(move || {
            let _slot = slot;
            tracing::debug!(task = %id, "Task started");
            let output = task(&task_token);
            let _ = tx.send(output);
        });

        Ok(TaskHandle { id, token, rx })
    }
}
