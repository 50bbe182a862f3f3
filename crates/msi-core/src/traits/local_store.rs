// # Local Store Trait
//
// Defines the interface the engine uses to persist records.
//
// ## Partitioning
//
// Every call is scoped by source key. Implementations must allow concurrent
// batch imports for *different* sources without one blocking or corrupting
// the other; imports for the same source are already serialized by that
// source's coordinator.
//
// ## Merge Semantics
//
// `batch_import` upserts by natural key. A record counts as changed when its
// key is new or its body differs from the stored body, so importing the same
// payload twice reports zero changes the second time. A failed import leaves
// the partition as it was.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::source::{SourceKey, SyncRecord};

/// A record as held by the local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Natural key
    pub key: String,
    /// Serialized record
    pub body: serde_json::Value,
}

impl StoredRecord {
    /// Serialize a source record for import
    pub fn from_record<R: SyncRecord>(record: &R) -> Result<Self> {
        Ok(Self {
            key: record.natural_key(),
            body: serde_json::to_value(record)?,
        })
    }
}

/// Geographic bounding box of a source's records
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_latitude: f64,
    pub min_longitude: f64,
    pub max_latitude: f64,
    pub max_longitude: f64,
}

impl Bounds {
    /// Grow the bounds to include a point
    pub fn include(bounds: Option<Self>, latitude: f64, longitude: f64) -> Self {
        match bounds {
            None => Self {
                min_latitude: latitude,
                min_longitude: longitude,
                max_latitude: latitude,
                max_longitude: longitude,
            },
            Some(b) => Self {
                min_latitude: b.min_latitude.min(latitude),
                min_longitude: b.min_longitude.min(longitude),
                max_latitude: b.max_latitude.max(latitude),
                max_longitude: b.max_longitude.max(longitude),
            },
        }
    }
}

/// Derived fields recomputed by [`LocalStore::post_process`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Number of stored records
    pub record_count: usize,
    /// Bounding box over records carrying `latitude`/`longitude`
    pub bounds: Option<Bounds>,
    /// When the summary was computed
    pub computed_at: DateTime<Utc>,
}

impl SourceSummary {
    /// Compute a summary over stored record bodies
    pub fn compute<'a>(bodies: impl Iterator<Item = &'a serde_json::Value>) -> Self {
        let mut record_count = 0;
        let mut bounds = None;

        for body in bodies {
            record_count += 1;
            let lat = body.get("latitude").and_then(serde_json::Value::as_f64);
            let lon = body.get("longitude").and_then(serde_json::Value::as_f64);
            if let (Some(lat), Some(lon)) = (lat, lon) {
                bounds = Some(Bounds::include(bounds, lat, lon));
            }
        }

        Self {
            record_count,
            bounds,
            computed_at: Utc::now(),
        }
    }
}

/// Trait for local store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Number of records stored for a source
    async fn count(&self, source: &SourceKey) -> Result<usize>;

    /// Upsert records for a source
    ///
    /// # Returns
    ///
    /// - `Ok(usize)`: Number of records inserted or changed
    /// - `Err(Error::Store)`: Persistence failure
    async fn batch_import(&self, source: &SourceKey, records: Vec<StoredRecord>) -> Result<usize>;

    /// Recompute derived fields for a source after a merge with changes
    async fn post_process(&self, _source: &SourceKey) -> Result<()> {
        Ok(())
    }

    /// Derived fields from the last post-processing run
    async fn summary(&self, _source: &SourceKey) -> Result<Option<SourceSummary>> {
        Ok(None)
    }

    /// When the source last completed an uncancelled sync
    ///
    /// Survives restarts in persistent stores so incremental query windows
    /// keep their lower bound.
    async fn last_sync(&self, _source: &SourceKey) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    /// Record a completed sync
    async fn set_last_sync(&self, _source: &SourceKey, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    /// Natural keys stored for a source
    async fn list_keys(&self, source: &SourceKey) -> Result<Vec<String>>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<()>;
}
