// # Local Store Implementations
//
// This module provides implementations of the LocalStore trait for
// different persistence strategies. Both keep one partition per source,
// each behind its own lock, so imports for different sources never wait on
// each other.

pub mod file;
pub mod memory;

pub use file::FileLocalStore;
pub use memory::MemoryLocalStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::traits::{LocalStore, SourceSummary, StoredRecord};

/// Records of one source, keyed by natural key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Partition {
    records: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<SourceSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_sync: Option<DateTime<Utc>>,
}

impl Partition {
    /// Upsert by natural key; returns how many records were new or changed
    pub(crate) fn merge(&mut self, batch: Vec<StoredRecord>) -> usize {
        let mut changed = 0;
        for StoredRecord { key, body } in batch {
            if self.records.get(&key) == Some(&body) {
                continue;
            }
            self.records.insert(key, body);
            changed += 1;
        }
        changed
    }

    pub(crate) fn recompute_summary(&mut self) {
        self.summary = Some(SourceSummary::compute(self.records.values()));
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub(crate) fn summary(&self) -> Option<SourceSummary> {
        self.summary.clone()
    }

    pub(crate) fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub(crate) fn set_last_sync(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
    }
}

/// Open the store described by the configuration
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn LocalStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryLocalStore::new())),
        StoreConfig::File { dir } => Ok(Arc::new(FileLocalStore::new(dir).await?)),
    }
}
