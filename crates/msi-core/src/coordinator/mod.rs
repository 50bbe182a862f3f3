//! Per-source sync coordinator
//!
//! A [`SourceCoordinator`] decides between bootstrap and incremental sync for
//! one source and sequences the stages on the source's own [`SerialQueue`].
//!
//! ## Invocation Flow
//!
//! ```text
//! fetch()
//!   │
//!   ├─ startLoad: loading = true, publish SourceLoading
//!   │
//!   ├─ count(source) == 0 ?
//!   │     yes ─► bundle fetch ─► load ─► finishLoad(Bootstrap)
//!   │
//!   ├─ remote fetch ─► load ─► finishLoad(Incremental)
//!   │
//!   └─ loading = false            (guard drop, on every exit path)
//! ```
//!
//! `finishLoad` publishes `SourceLoaded`, and when the load changed records
//! it invalidates the source's image cache, publishes `SourceUpdated`, and
//! publishes `SourceNeedsProcessed` if the source's policy covers the path.
//!
//! Invocations on one coordinator never overlap: a second `fetch()` waits for
//! the first one to release the loading flag before it starts.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{EventBus, SyncEvent};
use crate::source::{DataSource, DataSourceDescriptor, FetchContext, SourceKey, SyncPath};
use crate::stage::{FetchStage, Pipeline};
use crate::status::{LoadingGuard, SyncStatusStore};
use crate::task::SerialQueue;
use crate::traits::{BundleResource, LocalStore, RemoteEndpoint, SourceCache, SyncPolicy};

/// Collaborators shared by every coordinator
#[derive(Clone)]
pub struct SyncEnvironment {
    pub store: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteEndpoint>,
    pub bundle: Arc<dyn BundleResource>,
    pub policy: Arc<dyn SyncPolicy>,
    pub cache: Option<Arc<dyn SourceCache>>,
    pub events: EventBus,
    pub status: SyncStatusStore,
}

/// Outcome of one coordinator invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Source the invocation ran for
    pub source: SourceKey,
    /// Whether the bootstrap path ran
    pub bootstrapped: bool,
    /// Records changed by the bootstrap load
    pub bootstrap_changed: usize,
    /// Records changed by the incremental load
    pub incremental_changed: usize,
    /// Whether any stage was left cancelled
    pub cancelled: bool,
}

impl SyncReport {
    fn new(source: SourceKey) -> Self {
        Self {
            source,
            bootstrapped: false,
            bootstrap_changed: 0,
            incremental_changed: 0,
            cancelled: false,
        }
    }

    /// Total records changed by this invocation
    pub fn total_changed(&self) -> usize {
        self.bootstrap_changed + self.incremental_changed
    }
}

/// Handle to a running invocation
#[derive(Debug)]
pub struct SyncInvocation {
    source: SourceKey,
    token: CancellationToken,
    handle: JoinHandle<SyncReport>,
}

impl SyncInvocation {
    /// Source the invocation runs for
    pub fn source(&self) -> &SourceKey {
        &self.source
    }

    /// Cancel the in-flight stage; queued stages never start
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the invocation has released the loading flag
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the invocation to finish
    pub async fn wait(self) -> SyncReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(source = %self.source, error = %e, "sync invocation aborted");
                SyncReport {
                    cancelled: true,
                    ..SyncReport::new(self.source)
                }
            }
        }
    }
}

/// Type-erased coordinator, as held by the registry and the scheduler
pub trait Coordinator: Send + Sync {
    /// Identity of the coordinated source
    fn descriptor(&self) -> &DataSourceDescriptor;

    /// Start an invocation; see [`SourceCoordinator::fetch`]
    fn fetch(&self) -> SyncInvocation;

    /// Cancel every live invocation and queued stage in one call
    fn cancel_all(&self);
}

struct Shared<S: DataSource> {
    source: Arc<S>,
    env: SyncEnvironment,
    queue: SerialQueue,
    serial: tokio::sync::Mutex<()>,
    live: Mutex<Vec<(u64, CancellationToken)>>,
    next_invocation: AtomicU64,
}

/// Coordinator for one source
pub struct SourceCoordinator<S: DataSource> {
    shared: Arc<Shared<S>>,
}

impl<S: DataSource> SourceCoordinator<S> {
    /// Create a coordinator and its serial queue
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(source: S, env: SyncEnvironment) -> Self {
        let queue = SerialQueue::new(source.descriptor().key.as_str());
        Self {
            shared: Arc::new(Shared {
                source: Arc::new(source),
                env,
                queue,
                serial: tokio::sync::Mutex::new(()),
                live: Mutex::new(Vec::new()),
                next_invocation: AtomicU64::new(0),
            }),
        }
    }

    /// Identity of the coordinated source
    pub fn descriptor(&self) -> &DataSourceDescriptor {
        self.shared.source.descriptor()
    }

    /// Start an invocation and return immediately
    ///
    /// Bootstrap runs iff the store holds no records for the source when the
    /// invocation begins; the incremental path always runs afterwards.
    pub fn fetch(&self) -> SyncInvocation {
        let shared = Arc::clone(&self.shared);
        let token = CancellationToken::new();
        let id = shared.next_invocation.fetch_add(1, Ordering::Relaxed);
        shared.lock_live().push((id, token.clone()));

        let source = self.descriptor().key.clone();
        let driver_token = token.clone();
        let handle = tokio::spawn(async move {
            let report = shared.run_invocation(&driver_token).await;
            shared.lock_live().retain(|(live_id, _)| *live_id != id);
            report
        });

        SyncInvocation {
            source,
            token,
            handle,
        }
    }

    /// Cancel every live invocation and queued stage in one call
    pub fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> = self
            .shared
            .lock_live()
            .iter()
            .map(|(_, token)| token.clone())
            .collect();

        if !tokens.is_empty() {
            info!(source = %self.descriptor().key, invocations = tokens.len(), "cancelling sync");
        }
        for token in tokens {
            token.cancel();
        }
        self.shared.queue.cancel_all_operations();
    }

    /// Number of stages queued or executing
    pub fn pending_operations(&self) -> usize {
        self.shared.queue.operation_count()
    }
}

impl<S: DataSource> Coordinator for SourceCoordinator<S> {
    fn descriptor(&self) -> &DataSourceDescriptor {
        SourceCoordinator::descriptor(self)
    }

    fn fetch(&self) -> SyncInvocation {
        SourceCoordinator::fetch(self)
    }

    fn cancel_all(&self) {
        SourceCoordinator::cancel_all(self)
    }
}

impl<S: DataSource> Shared<S> {
    async fn run_invocation(&self, token: &CancellationToken) -> SyncReport {
        let _serial = self.serial.lock().await;
        let key = self.source.descriptor().key.clone();
        let guard = self.start_load();
        let mut report = SyncReport::new(key.clone());

        let count = match self.env.store.count(&key).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(source = %key, error = %e, "could not count local records, skipping bootstrap");
                None
            }
        };

        let mut cancelled = false;
        if count == Some(0) {
            info!(source = %key, "local store empty, bootstrapping from bundle");
            let stage = FetchStage::bundle(Arc::clone(&self.source), Arc::clone(&self.env.bundle));
            let (changed, stage_cancelled) = self.run_pipeline(stage, token).await;
            report.bootstrapped = true;
            report.bootstrap_changed = changed;
            cancelled |= stage_cancelled;
        }

        let context = FetchContext::now(self.last_sync(&key).await);
        let stage = FetchStage::remote(
            Arc::clone(&self.source),
            Arc::clone(&self.env.remote),
            Arc::clone(&self.env.policy),
            context,
        );
        let (changed, stage_cancelled) = self.run_pipeline(stage, token).await;
        report.incremental_changed = changed;
        cancelled |= stage_cancelled;

        report.cancelled = cancelled || token.is_cancelled();
        if !report.cancelled {
            let now = Utc::now();
            self.env.status.record_sync(&key, now);
            if let Err(e) = self.env.store.set_last_sync(&key, now).await {
                warn!(source = %key, error = %e, "could not persist last sync time");
            }
        }

        drop(guard);
        debug!(
            source = %key,
            bootstrapped = report.bootstrapped,
            changed = report.total_changed(),
            cancelled = report.cancelled,
            "sync invocation finished"
        );
        report
    }

    /// Lower bound of the incremental window, falling back to the store
    async fn last_sync(&self, key: &SourceKey) -> Option<DateTime<Utc>> {
        if let Some(at) = self.env.status.last_sync(key) {
            return Some(at);
        }
        match self.env.store.last_sync(key).await {
            Ok(Some(at)) => {
                self.env.status.restore_last_sync(key, at);
                Some(at)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(source = %key, error = %e, "could not read persisted last sync");
                None
            }
        }
    }

    /// Returns the changed count and whether a stage was cancelled
    async fn run_pipeline(&self, stage: FetchStage<S>, token: &CancellationToken) -> (usize, bool) {
        let pipeline = Pipeline::new(
            Arc::clone(&self.source),
            stage,
            Arc::clone(&self.env.store),
            token,
        );

        self.queue.enqueue(pipeline.fetch.clone());
        self.queue.enqueue(pipeline.load.clone());
        // A cancelled load finishes while still queued; the fetch may still be unwinding.
        pipeline.load.finished().await;
        pipeline.fetch.finished().await;

        let changed = pipeline.load.take_output().unwrap_or(0);
        self.finish_load(pipeline.path, changed).await;
        (changed, pipeline.was_cancelled())
    }

    fn start_load(&self) -> LoadingGuard {
        let key = &self.source.descriptor().key;
        let guard = self.env.status.begin_loading(key);
        self.env.events.publish(SyncEvent::SourceLoading {
            source: key.clone(),
        });
        guard
    }

    async fn finish_load(&self, path: SyncPath, changed: usize) {
        let descriptor = self.source.descriptor();
        let source = descriptor.key.clone();

        self.env.status.record_load(&source, changed);
        self.env.events.publish(SyncEvent::SourceLoaded {
            source: source.clone(),
            changed,
        });

        if changed == 0 {
            return;
        }

        if descriptor.image_cache {
            if let Some(cache) = &self.env.cache {
                if let Err(e) = cache.invalidate(&source).await {
                    warn!(source = %source, error = %e, "cache invalidation failed");
                }
            }
        }

        self.env.events.publish(SyncEvent::SourceUpdated {
            source: source.clone(),
            changed,
        });
        if descriptor.needs_processed.applies_to(path) {
            self.env
                .events
                .publish(SyncEvent::SourceNeedsProcessed { source });
        }
    }

    fn lock_live(&self) -> std::sync::MutexGuard<'_, Vec<(u64, CancellationToken)>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
