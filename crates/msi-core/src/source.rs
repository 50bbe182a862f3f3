//! Data source identity and the generic source contract
//!
//! A [`DataSource`] bundles everything that differs between datasets: the
//! record type, the bundled snapshot it can bootstrap from, and the remote
//! requests that fetch increments. Everything else (stages, coordinator,
//! scheduling) is written once against this trait.

use chrono::{DateTime, Datelike, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::traits::RemoteRequest;

/// Unique key of one independently synchronized dataset (e.g. `light`, `port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    /// Create a source key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Which path of a coordinator invocation produced a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPath {
    /// One-time load from the bundled snapshot (local store was empty)
    Bootstrap,
    /// Network fetch of new or changed records
    Incremental,
}

/// When a source publishes `SourceNeedsProcessed` after a merge with changes
///
/// Sources historically differ here; the table lives in [`crate::catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeedsProcessedPolicy {
    /// Never published
    Never,
    /// Only after the bootstrap load
    BootstrapOnly,
    /// After every merge that changed records
    EveryMerge,
}

impl NeedsProcessedPolicy {
    /// Whether the event applies to a load on `path`
    pub fn applies_to(self, path: SyncPath) -> bool {
        match self {
            NeedsProcessedPolicy::Never => false,
            NeedsProcessedPolicy::BootstrapOnly => path == SyncPath::Bootstrap,
            NeedsProcessedPolicy::EveryMerge => true,
        }
    }
}

/// Name and extension of a bundled snapshot resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    /// Resource name without extension
    pub name: String,
    /// Resource extension (e.g. `json`)
    pub extension: String,
}

impl BundleSpec {
    /// A JSON snapshot called `name.json`
    pub fn json(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extension: "json".to_string(),
        }
    }
}

/// Identity of a data source
///
/// Immutable once defined. The sync-eligibility predicate is owned by the
/// injected [`crate::traits::SyncPolicy`] and the last-sync timestamp by
/// [`crate::status::SyncStatusStore`]; both are looked up by `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSourceDescriptor {
    /// Unique key
    pub key: SourceKey,
    /// Human-readable name
    pub display_name: String,
    /// Bundled snapshot used for bootstrap, if the source ships one
    pub bundle: Option<BundleSpec>,
    /// When to publish `SourceNeedsProcessed`
    pub needs_processed: NeedsProcessedPolicy,
    /// Whether the store recomputes derived fields after a merge with changes
    pub post_process: bool,
    /// Whether the source owns an image cache that must be invalidated on change
    pub image_cache: bool,
}

impl DataSourceDescriptor {
    /// Create a descriptor with no bundle, no post-processing and no cache
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: SourceKey::new(key),
            display_name: display_name.into(),
            bundle: None,
            needs_processed: NeedsProcessedPolicy::Never,
            post_process: false,
            image_cache: false,
        }
    }

    /// Set the bundled snapshot
    pub fn with_bundle(mut self, bundle: BundleSpec) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Set the needs-processed policy
    pub fn with_needs_processed(mut self, policy: NeedsProcessedPolicy) -> Self {
        self.needs_processed = policy;
        self
    }

    /// Enable post-processing after merges
    pub fn with_post_process(mut self, enabled: bool) -> Self {
        self.post_process = enabled;
        self
    }

    /// Declare an image cache keyed by this source
    pub fn with_image_cache(mut self, enabled: bool) -> Self {
        self.image_cache = enabled;
        self
    }
}

/// A raw record decoded from a bundle or the network
///
/// Opaque to the coordinator; identity is the natural key, merge semantics
/// belong to the local store.
pub trait SyncRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Natural key used for upserts
    fn natural_key(&self) -> String;
}

/// Inputs available when building remote requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchContext {
    /// Completion time of the last uncancelled sync, if any
    pub last_sync: Option<DateTime<Utc>>,
    /// Time the fetch was prepared
    pub now: DateTime<Utc>,
}

impl FetchContext {
    /// Context for a fetch happening now
    pub fn now(last_sync: Option<DateTime<Utc>>) -> Self {
        Self {
            last_sync,
            now: Utc::now(),
        }
    }

    /// Calendar-date window `(since, until)` formatted as `YYYY-MM-DD`
    pub fn date_window(&self) -> (Option<String>, String) {
        let fmt = |dt: DateTime<Utc>| dt.format("%Y-%m-%d").to_string();
        (self.last_sync.map(fmt), fmt(self.now))
    }

    /// Notice-week window `(since, until)` formatted as `YYYYWW`
    pub fn notice_week_window(&self) -> (Option<String>, String) {
        (self.last_sync.map(notice_week), notice_week(self.now))
    }
}

/// ISO week of `at` as a notice number (`YYYYWW`)
pub fn notice_week(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}{:02}", week.year(), week.week())
}

/// Per-source definition consumed by the generic stages
pub trait DataSource: Send + Sync + 'static {
    /// Record type this source produces
    type Record: SyncRecord;

    /// Identity of the source
    fn descriptor(&self) -> &DataSourceDescriptor;

    /// JSON field holding the record array in responses and bundles
    fn collection_key(&self) -> &str;

    /// Requests fetching increments since the last sync
    ///
    /// Multiple requests (e.g. one per publication volume) are fetched in order
    /// and concatenated.
    fn remote_requests(&self, context: &FetchContext) -> Vec<RemoteRequest>;

    /// Decode a response body or bundle into records
    fn decode(&self, bytes: &[u8]) -> Result<Vec<Self::Record>> {
        decode_collection(bytes, self.collection_key())
    }
}

/// Decode `bytes` as either a bare JSON array or an object whose
/// `collection_key` field holds the array
pub fn decode_collection<T: DeserializeOwned>(bytes: &[u8], collection_key: &str) -> Result<Vec<T>> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| Error::decode(format!("invalid JSON: {}", e)))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove(collection_key) {
            Some(serde_json::Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::decode(format!(
                    "field '{}' is not an array (found {})",
                    collection_key,
                    json_kind(&other)
                )));
            }
            None => {
                return Err(Error::decode(format!(
                    "missing collection field '{}'",
                    collection_key
                )));
            }
        },
        other => {
            return Err(Error::decode(format!(
                "expected object or array, found {}",
                json_kind(&other)
            )));
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item)
                .map_err(|e| Error::decode(format!("record {} of '{}': {}", index, collection_key, e)))
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
