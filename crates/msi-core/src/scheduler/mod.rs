//! Periodic background refresh
//!
//! The [`BackgroundScheduler`] registers one handler per source with a
//! [`BackgroundTaskFacility`] (the OS periodic-task service, or the
//! in-process [`TokioBackgroundFacility`]). Each time the facility launches a
//! handler, the scheduler:
//!
//! 1. re-submits the next request for the source (`now + refresh interval`,
//!    never earlier than the facility's minimum),
//! 2. starts the coordinator's invocation,
//! 3. cancels every operation of that coordinator at once if the facility
//!    revokes execution time,
//! 4. reports completion exactly once: success iff nothing was left cancelled.
//!
//! Submission failures are logged and never fatal; the next foreground
//! trigger is the fallback.

pub mod facility;

pub use facility::{CompletionRecord, FacilitySettings, TokioBackgroundFacility};

use chrono::{DateTime, Utc};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::Coordinator;
use crate::error::SchedulingError;
use crate::source::SourceKey;

/// Identifier plus earliest eligible start of the next background run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub identifier: String,
    pub earliest_begin: DateTime<Utc>,
}

/// Reports the outcome of one background run to the facility
///
/// Consumed by [`CompletionReporter::report`], so it can report at most once.
/// Dropping it unreported counts as a failure.
#[derive(Debug)]
pub struct CompletionReporter {
    identifier: String,
    tx: Option<oneshot::Sender<bool>>,
}

impl CompletionReporter {
    /// Create a reporter and the receiver the facility waits on
    pub fn new(identifier: impl Into<String>) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        let reporter = Self {
            identifier: identifier.into(),
            tx: Some(tx),
        };
        (reporter, rx)
    }

    /// Report success or failure
    pub fn report(mut self, success: bool) {
        self.send(success);
    }

    fn send(&mut self, success: bool) {
        if let Some(tx) = self.tx.take() {
            debug!(task = %self.identifier, success, "reporting completion");
            // Facility may have shut down already.
            let _ = tx.send(success);
        }
    }
}

impl Drop for CompletionReporter {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(task = %self.identifier, "background run ended without reporting, marking failed");
            self.send(false);
        }
    }
}

/// One launch of a registered background task
#[derive(Debug)]
pub struct BackgroundInvocation {
    /// Registered task identifier
    pub identifier: String,
    /// Cancelled when the facility revokes execution time
    pub expiration: CancellationToken,
    /// Completion channel back to the facility
    pub completion: CompletionReporter,
}

/// Callback invoked by the facility when a task is launched
///
/// Must return promptly; long work belongs on a spawned task.
pub trait BackgroundTaskHandler: Send + Sync {
    fn handle(&self, invocation: BackgroundInvocation);
}

/// The periodic-task service the scheduler registers with
pub trait BackgroundTaskFacility: Send + Sync {
    /// Register the handler launched for `identifier`
    fn register(
        &self,
        identifier: &str,
        handler: Arc<dyn BackgroundTaskHandler>,
    ) -> Result<(), SchedulingError>;

    /// Submit (or replace) the pending request for an identifier
    ///
    /// # Returns
    ///
    /// - `Err(SchedulingError::NotPermitted)`: Identifier not registered or refresh disabled
    /// - `Err(SchedulingError::TooManyPending)`: Pending-request limit reached
    /// - `Err(SchedulingError::Unavailable)`: Facility not running
    fn submit(&self, request: ScheduleRequest) -> Result<(), SchedulingError>;

    /// Shortest delay the facility honors between submission and launch
    fn minimum_interval(&self) -> Duration {
        Duration::ZERO
    }
}

/// Registers coordinators for periodic refresh
pub struct BackgroundScheduler {
    facility: Arc<dyn BackgroundTaskFacility>,
    refresh_interval: Duration,
    id_prefix: String,
}

impl BackgroundScheduler {
    /// Default task-identifier prefix
    pub const DEFAULT_PREFIX: &'static str = "msi.refresh";

    /// Create a scheduler
    ///
    /// # Parameters
    ///
    /// - `facility`: Service that launches registered tasks
    /// - `refresh_interval`: Offset of each renewal request from the current run
    pub fn new(facility: Arc<dyn BackgroundTaskFacility>, refresh_interval: Duration) -> Arc<Self> {
        Self::with_prefix(facility, refresh_interval, Self::DEFAULT_PREFIX)
    }

    /// Create a scheduler with a custom task-identifier prefix
    pub fn with_prefix(
        facility: Arc<dyn BackgroundTaskFacility>,
        refresh_interval: Duration,
        id_prefix: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            facility,
            refresh_interval,
            id_prefix: id_prefix.into(),
        })
    }

    /// Task identifier used for a source
    pub fn task_identifier(&self, source: &SourceKey) -> String {
        format!("{}.{}", self.id_prefix, source)
    }

    /// Register a coordinator's handler and submit its first request
    ///
    /// # Returns
    ///
    /// `true` if both registration and submission succeeded. Failures are
    /// logged; the coordinator still works for foreground triggers.
    pub fn register(self: &Arc<Self>, coordinator: Arc<dyn Coordinator>) -> bool {
        let identifier = self.task_identifier(&coordinator.descriptor().key);
        let handler = Arc::new(RefreshHandler {
            scheduler: Arc::downgrade(self),
            coordinator,
        });

        if let Err(e) = self.facility.register(&identifier, handler) {
            log_submission_error(&identifier, &e);
            return false;
        }
        info!(task = %identifier, "background refresh registered");
        self.schedule(&identifier)
    }

    /// Submit the next request for `identifier`
    ///
    /// Returns `false` if the facility refused it.
    pub fn schedule(&self, identifier: &str) -> bool {
        let delay = self.refresh_interval.max(self.facility.minimum_interval());
        let now = Utc::now();
        let earliest_begin = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let request = ScheduleRequest {
            identifier: identifier.to_string(),
            earliest_begin,
        };
        match self.facility.submit(request) {
            Ok(()) => {
                debug!(task = %identifier, %earliest_begin, "next refresh scheduled");
                true
            }
            Err(e) => {
                log_submission_error(identifier, &e);
                false
            }
        }
    }

    /// Handle one launch of a coordinator's task
    pub async fn run_refresh(&self, coordinator: &dyn Coordinator, invocation: BackgroundInvocation) {
        let BackgroundInvocation {
            identifier,
            expiration,
            completion,
        } = invocation;

        // Re-arm first so an expired or failed run still has a successor.
        self.schedule(&identifier);

        info!(task = %identifier, "background refresh started");
        let sync = coordinator.fetch();
        let wait = sync.wait();
        tokio::pin!(wait);

        let report = tokio::select! {
            report = &mut wait => report,
            _ = expiration.cancelled() => {
                warn!(task = %identifier, "background time expired, cancelling sync");
                coordinator.cancel_all();
                wait.await
            }
        };

        let success = !report.cancelled;
        info!(
            task = %identifier,
            success,
            changed = report.total_changed(),
            "background refresh finished"
        );
        completion.report(success);
    }
}

struct RefreshHandler {
    scheduler: Weak<BackgroundScheduler>,
    coordinator: Arc<dyn Coordinator>,
}

impl BackgroundTaskHandler for RefreshHandler {
    fn handle(&self, invocation: BackgroundInvocation) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            warn!(task = %invocation.identifier, "scheduler dropped, ignoring launch");
            invocation.completion.report(false);
            return;
        };

        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            scheduler.run_refresh(coordinator.as_ref(), invocation).await;
        });
    }
}

fn log_submission_error(identifier: &str, err: &SchedulingError) {
    match err {
        SchedulingError::NotPermitted(_) => {
            warn!(task = %identifier, "background refresh not permitted")
        }
        SchedulingError::TooManyPending(limit) => {
            warn!(task = %identifier, limit, "too many pending background requests")
        }
        SchedulingError::Unavailable => {
            warn!(task = %identifier, "background scheduler unavailable")
        }
        SchedulingError::Other(reason) => {
            error!(task = %identifier, %reason, "could not schedule background refresh")
        }
    }
}
