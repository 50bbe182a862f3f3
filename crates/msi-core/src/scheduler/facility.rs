//! In-process background-task facility
//!
//! Stands in for the OS periodic-task service on platforms without one (and
//! in tests). Requests fire on Tokio timers; each launch gets an expiration
//! budget after which its `expiration` token is cancelled.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    BackgroundInvocation, BackgroundTaskFacility, BackgroundTaskHandler, CompletionReporter,
    ScheduleRequest,
};
use crate::error::SchedulingError;

/// Limits applied by [`TokioBackgroundFacility`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilitySettings {
    /// Execution budget per launch
    pub expiration: Duration,
    /// Maximum number of identifiers with a pending request
    pub max_pending: usize,
    /// Shortest honored delay between submission and launch
    pub minimum_interval: Duration,
}

impl Default for FacilitySettings {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(30),
            max_pending: 16,
            minimum_interval: Duration::ZERO,
        }
    }
}

/// Outcome of one launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub identifier: String,
    pub success: bool,
    /// The expiration budget ran out before completion was reported
    pub expired: bool,
    pub finished_at: DateTime<Utc>,
}

struct Pending {
    request: ScheduleRequest,
    generation: u64,
    cancel: CancellationToken,
}

struct Inner {
    settings: FacilitySettings,
    handlers: RwLock<HashMap<String, Arc<dyn BackgroundTaskHandler>>>,
    pending: Mutex<HashMap<String, Pending>>,
    completions: Mutex<Vec<CompletionRecord>>,
    completion_tx: broadcast::Sender<CompletionRecord>,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

/// Tokio-timer implementation of [`BackgroundTaskFacility`]
#[derive(Clone)]
pub struct TokioBackgroundFacility {
    inner: Arc<Inner>,
}

impl TokioBackgroundFacility {
    /// Create a running facility
    pub fn new(settings: FacilitySettings) -> Self {
        let (completion_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                settings,
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                completions: Mutex::new(Vec::new()),
                completion_tx,
                shutdown: CancellationToken::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Launch a registered task immediately, consuming its pending request
    pub fn launch_now(&self, identifier: &str) -> Result<(), SchedulingError> {
        self.ensure_running()?;
        if !self.is_registered(identifier) {
            return Err(SchedulingError::NotPermitted(identifier.to_string()));
        }

        if let Some(pending) = self.lock_pending().remove(identifier) {
            pending.cancel.cancel();
        }
        self.inner.launch(identifier);
        Ok(())
    }

    /// Pending requests, ordered by earliest begin
    pub fn pending_requests(&self) -> Vec<ScheduleRequest> {
        let mut requests: Vec<ScheduleRequest> = self
            .lock_pending()
            .values()
            .map(|pending| pending.request.clone())
            .collect();
        requests.sort_by_key(|request| request.earliest_begin);
        requests
    }

    /// Every completion reported so far
    pub fn completions(&self) -> Vec<CompletionRecord> {
        self.inner
            .completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Completions reported from now on
    pub fn subscribe_completions(&self) -> broadcast::Receiver<CompletionRecord> {
        self.inner.completion_tx.subscribe()
    }

    /// Stop launching: drop pending requests and expire running launches
    pub fn shutdown(&self) {
        info!("background facility shutting down");
        self.inner.shutdown.cancel();
        for (_, pending) in self.lock_pending().drain() {
            pending.cancel.cancel();
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn ensure_running(&self) -> Result<(), SchedulingError> {
        if self.is_shut_down() {
            Err(SchedulingError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn is_registered(&self, identifier: &str) -> bool {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identifier)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TokioBackgroundFacility {
    fn default() -> Self {
        Self::new(FacilitySettings::default())
    }
}

impl BackgroundTaskFacility for TokioBackgroundFacility {
    fn register(
        &self,
        identifier: &str,
        handler: Arc<dyn BackgroundTaskHandler>,
    ) -> Result<(), SchedulingError> {
        self.ensure_running()?;
        let replaced = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string(), handler)
            .is_some();

        if replaced {
            debug!(task = %identifier, "handler replaced");
        }
        Ok(())
    }

    fn submit(&self, request: ScheduleRequest) -> Result<(), SchedulingError> {
        self.ensure_running()?;
        if !self.is_registered(&request.identifier) {
            return Err(SchedulingError::NotPermitted(request.identifier));
        }

        let mut pending = self.lock_pending();
        let max_pending = self.inner.settings.max_pending;
        if !pending.contains_key(&request.identifier) && pending.len() >= max_pending {
            return Err(SchedulingError::TooManyPending(max_pending));
        }

        let now = Utc::now();
        let minimum = chrono::Duration::from_std(self.inner.settings.minimum_interval)
            .unwrap_or(chrono::Duration::zero());
        let not_before = now.checked_add_signed(minimum).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let earliest_begin = request.earliest_begin.max(not_before);
        let delay = (earliest_begin - now).to_std().unwrap_or(Duration::ZERO);

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.shutdown.child_token();
        let identifier = request.identifier.clone();

        if let Some(previous) = pending.insert(
            identifier.clone(),
            Pending {
                request: ScheduleRequest {
                    identifier: identifier.clone(),
                    earliest_begin,
                },
                generation,
                cancel: cancel.clone(),
            },
        ) {
            debug!(task = %identifier, "replacing pending request");
            previous.cancel.cancel();
        }
        drop(pending);

        debug!(task = %identifier, delay_ms = delay.as_millis() as u64, "request accepted");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let current = {
                let mut pending = inner.pending.lock().unwrap_or_else(PoisonError::into_inner);
                match pending.get(&identifier) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&identifier);
                        true
                    }
                    _ => false,
                }
            };
            if current {
                inner.launch(&identifier);
            }
        });

        Ok(())
    }

    fn minimum_interval(&self) -> Duration {
        self.inner.settings.minimum_interval
    }
}

impl Inner {
    fn launch(self: &Arc<Self>, identifier: &str) {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned();
        let Some(handler) = handler else {
            warn!(task = %identifier, "launch for unregistered task ignored");
            return;
        };

        info!(task = %identifier, "launching background task");
        let expiration = self.shutdown.child_token();
        let (completion, done) = CompletionReporter::new(identifier);

        handler.handle(BackgroundInvocation {
            identifier: identifier.to_string(),
            expiration: expiration.clone(),
            completion,
        });

        let inner = Arc::clone(self);
        let identifier = identifier.to_string();
        tokio::spawn(async move {
            tokio::pin!(done);
            let budget = tokio::time::sleep(inner.settings.expiration);
            tokio::pin!(budget);

            let (outcome, expired) = tokio::select! {
                outcome = &mut done => (outcome, false),
                _ = &mut budget => {
                    warn!(task = %identifier, "expiration budget exhausted");
                    expiration.cancel();
                    (done.await, true)
                }
            };

            let record = CompletionRecord {
                identifier,
                success: outcome.unwrap_or(false),
                expired,
                finished_at: Utc::now(),
            };
            debug!(task = %record.identifier, success = record.success, expired, "completion recorded");

            inner
                .completions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.clone());
            let _ = inner.completion_tx.send(record);
        });
    }
}
