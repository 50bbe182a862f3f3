//! Test doubles and common utilities for sync contract tests
//!
//! The doubles count calls and can be slowed down or made to fail, so the
//! tests can observe what the coordinator did without a network or a disk.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use msi_core::error::{Error, Result};
use msi_core::source::{
    BundleSpec, DataSource, DataSourceDescriptor, FetchContext, NeedsProcessedPolicy, SourceKey,
    SyncRecord,
};
use msi_core::traits::{
    AlwaysSync, BundleResource, LocalStore, RemoteEndpoint, RemoteRequest, SourceCache,
    StoredRecord, SyncPolicy,
};
use msi_core::{
    EventBus, EventSubscription, MemoryLocalStore, StaticBundle, SyncEnvironment, SyncEvent,
    SyncStatusStore,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const HAZARDS: &str = "hazards";

/// Record used by every contract test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    pub id: String,
    pub level: i64,
}

impl SyncRecord for Hazard {
    fn natural_key(&self) -> String {
        self.id.clone()
    }
}

pub fn hazard(id: &str, level: i64) -> Hazard {
    Hazard {
        id: id.to_string(),
        level,
    }
}

/// Serialized response or bundle body holding `hazards`
pub fn hazards_body(hazards: &[Hazard]) -> Vec<u8> {
    serde_json::to_vec(&json!({ HAZARDS: hazards })).unwrap()
}

/// A source with one remote request and a configurable descriptor
pub struct HazardSource {
    descriptor: DataSourceDescriptor,
}

impl HazardSource {
    /// Bundled source with no needs-processed event
    pub fn new() -> Self {
        Self::with_descriptor(
            DataSourceDescriptor::new(HAZARDS, "Hazards").with_bundle(BundleSpec::json(HAZARDS)),
        )
    }

    pub fn with_policy(policy: NeedsProcessedPolicy) -> Self {
        Self::with_descriptor(
            DataSourceDescriptor::new(HAZARDS, "Hazards")
                .with_bundle(BundleSpec::json(HAZARDS))
                .with_needs_processed(policy),
        )
    }

    pub fn with_descriptor(descriptor: DataSourceDescriptor) -> Self {
        Self { descriptor }
    }
}

impl DataSource for HazardSource {
    type Record = Hazard;

    fn descriptor(&self) -> &DataSourceDescriptor {
        &self.descriptor
    }

    fn collection_key(&self) -> &str {
        HAZARDS
    }

    fn remote_requests(&self, context: &FetchContext) -> Vec<RemoteRequest> {
        let (since, until) = context.date_window();
        vec![
            RemoteRequest::new("/hazards")
                .with_optional_query("minDate", since)
                .with_query("maxDate", until),
        ]
    }
}

pub fn hazards_key() -> SourceKey {
    SourceKey::new(HAZARDS)
}

enum Reply {
    Body(Vec<u8>),
    Fail(String),
}

/// Remote endpoint answering from a script
///
/// Each request pops the next scripted reply; an empty script answers with an
/// empty collection.
pub struct ScriptedRemote {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RemoteRequest>>,
    delay: Duration,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// Every request takes `delay` before it answers
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn respond(&self, hazards: &[Hazard]) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Body(hazards_body(hazards)));
        self
    }

    pub fn fail(&self, reason: &str) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply::Fail(reason.to_string()));
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteEndpoint for ScriptedRemote {
    async fn get(&self, request: &RemoteRequest) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Fail(reason)) => Err(Error::transport(reason)),
            None => Ok(hazards_body(&[])),
        }
    }

    fn endpoint_name(&self) -> &'static str {
        "scripted"
    }
}

/// Bundle wrapper counting resource loads
pub struct CountingBundle {
    inner: StaticBundle,
    loads: AtomicUsize,
}

impl CountingBundle {
    pub fn new(inner: StaticBundle) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
        }
    }

    /// Bundle holding `hazards.json`
    pub fn with_hazards(hazards: &[Hazard]) -> Self {
        Self::new(StaticBundle::new().with_resource(HAZARDS, "json", hazards_body(hazards)))
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BundleResource for CountingBundle {
    async fn load_resource(&self, name: &str, extension: &str) -> Result<Vec<u8>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_resource(name, extension).await
    }
}

/// Store wrapper counting merges, optionally slow or unable to count
pub struct CountingStore {
    inner: Arc<dyn LocalStore>,
    imports: AtomicUsize,
    import_delay: Duration,
    fail_count: bool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::over(Arc::new(MemoryLocalStore::new()))
    }

    /// Count calls made against another store
    pub fn over(inner: Arc<dyn LocalStore>) -> Self {
        Self {
            inner,
            imports: AtomicUsize::new(0),
            import_delay: Duration::ZERO,
            fail_count: false,
        }
    }

    pub fn with_import_delay(mut self, delay: Duration) -> Self {
        self.import_delay = delay;
        self
    }

    /// `count` always fails
    pub fn failing_count(mut self) -> Self {
        self.fail_count = true;
        self
    }

    /// Insert records directly, bypassing the counters
    pub async fn seed(&self, hazards: &[Hazard]) {
        let records = hazards
            .iter()
            .map(|hazard| StoredRecord::from_record(hazard).unwrap())
            .collect();
        self.inner.batch_import(&hazards_key(), records).await.unwrap();
    }

    pub fn import_count(&self) -> usize {
        self.imports.load(Ordering::SeqCst)
    }

    pub async fn stored(&self) -> usize {
        self.inner.count(&hazards_key()).await.unwrap()
    }
}

#[async_trait]
impl LocalStore for CountingStore {
    async fn count(&self, source: &SourceKey) -> Result<usize> {
        if self.fail_count {
            return Err(Error::store("count unavailable"));
        }
        self.inner.count(source).await
    }

    async fn batch_import(&self, source: &SourceKey, records: Vec<StoredRecord>) -> Result<usize> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        if !self.import_delay.is_zero() {
            tokio::time::sleep(self.import_delay).await;
        }
        self.inner.batch_import(source, records).await
    }

    async fn last_sync(&self, source: &SourceKey) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_sync(source).await
    }

    async fn set_last_sync(&self, source: &SourceKey, at: DateTime<Utc>) -> Result<()> {
        self.inner.set_last_sync(source, at).await
    }

    async fn list_keys(&self, source: &SourceKey) -> Result<Vec<String>> {
        self.inner.list_keys(source).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// Cache counting invalidations
#[derive(Default)]
pub struct CountingCache {
    invalidations: AtomicUsize,
}

impl CountingCache {
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceCache for CountingCache {
    async fn invalidate(&self, _source: &SourceKey) -> Result<()> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Policy refusing every remote fetch
pub struct NeverSync;

impl SyncPolicy for NeverSync {
    fn should_sync(&self, _source: &DataSourceDescriptor) -> bool {
        false
    }
}

/// Environment with fresh event bus and status store
pub fn environment(
    store: Arc<CountingStore>,
    remote: Arc<ScriptedRemote>,
    bundle: Arc<CountingBundle>,
) -> SyncEnvironment {
    SyncEnvironment {
        store,
        remote,
        bundle,
        policy: Arc::new(AlwaysSync),
        cache: None,
        events: EventBus::default(),
        status: SyncStatusStore::new(),
    }
}

/// Every buffered event, as `(kind, changed)` pairs
pub fn event_trace(subscription: &mut EventSubscription) -> Vec<(&'static str, Option<usize>)> {
    subscription
        .drain()
        .into_iter()
        .map(|event| {
            let changed = match &event {
                SyncEvent::SourceLoaded { changed, .. } | SyncEvent::SourceUpdated { changed, .. } => {
                    Some(*changed)
                }
                _ => None,
            };
            (event.kind(), changed)
        })
        .collect()
}
