// # Memory Local Store
//
// In-memory implementation of LocalStore.
//
// ## Purpose
//
// Provides a simple, fast store that doesn't persist across restarts. Every
// restart bootstraps each source from its bundle again.
//
// ## When to Use
//
// - Testing environments
// - Short-lived sync runs where only the events matter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::RwLock;

use super::Partition;
use crate::error::Result;
use crate::source::SourceKey;
use crate::traits::{LocalStore, SourceSummary, StoredRecord};

/// In-memory local store
///
/// The partition map is behind a short-lived std lock; each partition has its
/// own async lock held for the duration of a merge.
///
/// # Example
///
/// ```rust,no_run
/// use msi_core::store::MemoryLocalStore;
/// use msi_core::source::SourceKey;
/// use msi_core::traits::LocalStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryLocalStore::new();
///     assert_eq!(store.count(&SourceKey::new("asam")).await?, 0);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryLocalStore {
    partitions: Arc<StdRwLock<HashMap<SourceKey, Arc<RwLock<Partition>>>>>,
}

impl MemoryLocalStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every record of every source
    pub fn clear(&self) {
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn existing(&self, source: &SourceKey) -> Option<Arc<RwLock<Partition>>> {
        self.partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
    }

    fn partition(&self, source: &SourceKey) -> Arc<RwLock<Partition>> {
        if let Some(partition) = self.existing(source) {
            return partition;
        }
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(source.clone())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn count(&self, source: &SourceKey) -> Result<usize> {
        match self.existing(source) {
            Some(partition) => Ok(partition.read().await.len()),
            None => Ok(0),
        }
    }

    async fn batch_import(&self, source: &SourceKey, records: Vec<StoredRecord>) -> Result<usize> {
        let partition = self.partition(source);
        let changed = partition.write().await.merge(records);
        tracing::trace!(source = %source, changed, "memory import");
        Ok(changed)
    }

    async fn post_process(&self, source: &SourceKey) -> Result<()> {
        self.partition(source).write().await.recompute_summary();
        Ok(())
    }

    async fn summary(&self, source: &SourceKey) -> Result<Option<SourceSummary>> {
        match self.existing(source) {
            Some(partition) => Ok(partition.read().await.summary()),
            None => Ok(None),
        }
    }

    async fn last_sync(&self, source: &SourceKey) -> Result<Option<DateTime<Utc>>> {
        match self.existing(source) {
            Some(partition) => Ok(partition.read().await.last_sync()),
            None => Ok(None),
        }
    }

    async fn set_last_sync(&self, source: &SourceKey, at: DateTime<Utc>) -> Result<()> {
        self.partition(source).write().await.set_last_sync(at);
        Ok(())
    }

    async fn list_keys(&self, source: &SourceKey) -> Result<Vec<String>> {
        match self.existing(source) {
            Some(partition) => Ok(partition.read().await.keys()),
            None => Ok(Vec::new()),
        }
    }

    async fn flush(&self) -> Result<()> {
        // No-op for memory store
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn batch(keys: &[&str]) -> Vec<StoredRecord> {
        keys.iter()
            .map(|key| StoredRecord {
                key: key.to_string(),
                body: json!({ "id": key }),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryLocalStore::new();
        let asam = SourceKey::new("asam");

        assert_eq!(store.count(&asam).await.unwrap(), 0);
        assert_eq!(store.batch_import(&asam, batch(&["b", "a"])).await.unwrap(), 2);
        assert_eq!(store.count(&asam).await.unwrap(), 2);
        assert_eq!(store.list_keys(&asam).await.unwrap(), vec!["a", "b"]);

        store.clear();
        assert_eq!(store.count(&asam).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sources_are_partitioned() {
        let store = MemoryLocalStore::new();
        store
            .batch_import(&SourceKey::new("asam"), batch(&["1"]))
            .await
            .unwrap();
        store
            .batch_import(&SourceKey::new("modu"), batch(&["1", "2"]))
            .await
            .unwrap();

        assert_eq!(store.count(&SourceKey::new("asam")).await.unwrap(), 1);
        assert_eq!(store.count(&SourceKey::new("modu")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn import_into_one_source_does_not_wait_for_another() {
        let store = MemoryLocalStore::new();
        let lights = SourceKey::new("light");

        // Hold the lights partition as if a long merge were running
        let held = store.partition(&lights);
        let _guard = held.write().await;

        let ports = tokio::time::timeout(
            Duration::from_secs(1),
            store.batch_import(&SourceKey::new("port"), batch(&["1"])),
        )
        .await
        .expect("port import is not blocked by light partition");
        assert_eq!(ports.unwrap(), 1);
    }

    #[tokio::test]
    async fn post_process_computes_summary() {
        let store = MemoryLocalStore::new();
        let port = SourceKey::new("port");
        store.batch_import(&port, batch(&["1", "2"])).await.unwrap();
        assert_eq!(store.summary(&port).await.unwrap(), None);

        store.post_process(&port).await.unwrap();
        let summary = store.summary(&port).await.unwrap().unwrap();
        assert_eq!(summary.record_count, 2);
    }
}
