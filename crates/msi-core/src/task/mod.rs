//! Cancellable asynchronous tasks
//!
//! A [`CancellableTask`] is a unit of work with an observable lifecycle:
//!
//! ```text
//! Ready ──start()──► Executing ──work returns──► Finished
//!   │                    │
//!   └──cancel()──► Finished   cancel() keeps Executing until the work
//!                             observes its token and returns
//! ```
//!
//! State changes are published on a `tokio::sync::watch` channel so a
//! [`SerialQueue`] (or any other watcher) can wait for `Finished` without
//! polling. Tasks are created fresh per invocation and never restarted.
//!
//! Cancellation is cooperative: the work closure receives a
//! [`CancellationToken`] and must check it before each suspension point.

pub mod queue;

pub use queue::SerialQueue;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not started
    Ready,
    /// Work is running
    Executing,
    /// Work returned, or the task was cancelled before it started
    Finished,
}

/// Snapshot of a task's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStatus {
    /// Current state
    pub state: TaskState,
    /// Whether cancellation was requested
    pub cancelled: bool,
}

impl TaskStatus {
    const READY: TaskStatus = TaskStatus {
        state: TaskState::Ready,
        cancelled: false,
    };

    /// Finished, or cancelled while not executing
    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished || (self.cancelled && self.state != TaskState::Executing)
    }
}

type BoxedWork<T> =
    Box<dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = T> + Send>> + Send>;

/// A single-use unit of asynchronous work with cooperative cancellation
pub struct CancellableTask<T> {
    name: String,
    token: CancellationToken,
    status: watch::Sender<TaskStatus>,
    work: Mutex<Option<BoxedWork<T>>>,
    output: Mutex<Option<T>>,
}

impl<T: Send + 'static> CancellableTask<T> {
    /// Create a task in the `Ready` state
    ///
    /// `token` is usually a child of an invocation-wide token so that a
    /// single cancel reaches every stage at once.
    pub fn new<F, Fut>(name: impl Into<String>, token: CancellationToken, work: F) -> Arc<Self>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (status, _) = watch::channel(TaskStatus::READY);
        let work: BoxedWork<T> = Box::new(move |token| Box::pin(work(token)));

        Arc::new(Self {
            name: name.into(),
            token,
            status,
            work: Mutex::new(Some(work)),
            output: Mutex::new(None),
        })
    }

    /// Task name (for logging)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the work on the Tokio runtime and return immediately
    ///
    /// If cancellation was requested before this call, the task moves straight
    /// to `Finished` and the work never runs. Calling `start` twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let work = self
            .work
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(work) = work else {
            trace!(task = %self.name, "start ignored, task already started");
            return;
        };

        let cancelled = self.token.is_cancelled();
        let began = self.status.send_if_modified(|status| {
            if status.state == TaskState::Ready && !status.cancelled && !cancelled {
                status.state = TaskState::Executing;
                true
            } else {
                false
            }
        });

        if !began {
            debug!(task = %self.name, "cancelled before start, skipping work");
            self.finish();
            return;
        }

        trace!(task = %self.name, "executing");
        let guard = FinishOnDrop(Arc::clone(self));
        let token = self.token.clone();
        tokio::spawn(async move {
            let output = work(token).await;
            *guard
                .0
                .output
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(output);
            drop(guard);
        });
    }

    /// Request cancellation
    ///
    /// A `Ready` task finishes immediately; an `Executing` task finishes once
    /// its work observes the token.
    pub fn cancel(&self) {
        self.token.cancel();
        self.status.send_modify(|status| {
            status.cancelled = true;
            if status.state == TaskState::Ready {
                status.state = TaskState::Finished;
            }
        });
    }

    /// Current lifecycle snapshot
    pub fn status(&self) -> TaskStatus {
        let mut status = *self.status.borrow();
        status.cancelled |= self.token.is_cancelled();
        status
    }

    /// Whether cancellation was requested (directly or through a parent token)
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// See [`TaskStatus::is_finished`]
    pub fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    /// Subscribe to lifecycle changes
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        self.status.subscribe()
    }

    /// Wait until the task reaches `Finished`
    pub async fn finished(&self) -> TaskStatus {
        let mut rx = self.status.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|status| status.state == TaskState::Finished).await;
        self.status()
    }

    /// Take the work's output; `None` if the work never ran or it was taken
    pub fn take_output(&self) -> Option<T> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn finish(&self) {
        let cancelled = self.token.is_cancelled();
        self.status.send_if_modified(|status| {
            if status.state == TaskState::Finished && (status.cancelled || !cancelled) {
                return false;
            }
            status.state = TaskState::Finished;
            status.cancelled |= cancelled;
            true
        });
        trace!(task = %self.name, cancelled, "finished");
    }
}

/// Moves the task to `Finished` even if the work panics or is dropped by a
/// runtime shutdown
struct FinishOnDrop<T: Send + 'static>(Arc<CancellableTask<T>>);

impl<T: Send + 'static> Drop for FinishOnDrop<T> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Type-erased view of a task, as seen by a queue
pub trait Operation: Send + Sync {
    /// Task name (for logging)
    fn name(&self) -> &str;

    /// Start the task; see [`CancellableTask::start`]
    fn launch(self: Arc<Self>);

    /// See [`CancellableTask::cancel`]
    fn cancel(&self);

    /// See [`CancellableTask::status`]
    fn status(&self) -> TaskStatus;

    /// See [`CancellableTask::subscribe`]
    fn subscribe(&self) -> watch::Receiver<TaskStatus>;
}

impl<T: Send + 'static> Operation for CancellableTask<T> {
    fn name(&self) -> &str {
        CancellableTask::name(self)
    }

    fn launch(self: Arc<Self>) {
        CancellableTask::start(&self);
    }

    fn cancel(&self) {
        CancellableTask::cancel(self);
    }

    fn status(&self) -> TaskStatus {
        CancellableTask::status(self)
    }

    fn subscribe(&self) -> watch::Receiver<TaskStatus> {
        CancellableTask::subscribe(self)
    }
}
