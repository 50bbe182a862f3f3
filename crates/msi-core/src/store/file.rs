// # File Local Store
//
// File-based implementation of LocalStore with crash recovery.
//
// ## Layout
//
// One JSON file per source under the store directory:
//
// ```text
// <dir>/asam.json
// <dir>/asam.backup     previous good copy
// <dir>/asam.tmp        in-flight write, renamed over asam.json
// ```
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good partition
// - Write before publish: a failed write leaves the loaded partition untouched
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "source": "port",
//   "records": { "1234": { "portNumber": 1234, "portName": "Aden" } },
//   "summary": { "record_count": 1, "bounds": null, "computed_at": "..." },
//   "last_sync": "2024-06-01T12:00:00Z"
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use super::Partition;
use crate::error::{Error, Result};
use crate::source::SourceKey;
use crate::traits::{LocalStore, SourceSummary, StoredRecord};

/// Partition file format version
const PARTITION_FILE_VERSION: &str = "1.0";

/// File-based local store with crash recovery
///
/// Partitions are loaded lazily on first access. A mutation is applied to a
/// copy of the partition and only becomes visible once that copy is on disk.
///
/// # Example
///
/// ```rust,no_run
/// use msi_core::store::FileLocalStore;
/// use msi_core::source::SourceKey;
/// use msi_core::traits::LocalStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileLocalStore::new("/var/lib/msi/store").await?;
///     let ports = store.count(&SourceKey::new("port")).await?;
///     println!("{ports} ports stored");
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileLocalStore {
    dir: PathBuf,
    partitions: Mutex<HashMap<SourceKey, Arc<RwLock<Partition>>>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PartitionFileFormat {
    version: String,
    source: SourceKey,
    #[serde(flatten)]
    data: Partition,
}

impl FileLocalStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub async fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.exists() {
            fs::create_dir_all(&dir).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        Ok(Self {
            dir,
            partitions: Mutex::new(HashMap::new()),
        })
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a source's partition file
    pub fn partition_path(&self, source: &SourceKey) -> PathBuf {
        self.dir.join(format!("{}.json", source))
    }

    async fn partition(&self, source: &SourceKey) -> Result<Arc<RwLock<Partition>>> {
        let mut partitions = self.partitions.lock().await;
        if let Some(partition) = partitions.get(source) {
            return Ok(Arc::clone(partition));
        }

        let data = load_with_recovery(&self.partition_path(source)).await?;
        let partition = Arc::new(RwLock::new(data));
        partitions.insert(source.clone(), Arc::clone(&partition));
        Ok(partition)
    }

    async fn write_partition(&self, source: &SourceKey, data: &Partition) -> Result<()> {
        let path = self.partition_path(source);
        let file = PartitionFileFormat {
            version: PARTITION_FILE_VERSION.to_string(),
            source: source.clone(),
            data: data.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| Error::store(format!("Failed to serialize {}: {}", source, e)))?;

        // Write to temporary file first
        let temp_path = path.with_extension("tmp");
        {
            let mut out = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.write_all(&json).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.flush().await.map_err(|e| {
                Error::store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        // Keep the previous good copy
        if path.exists() {
            if let Err(e) = fs::copy(&path, backup_path(&path)).await {
                tracing::warn!(source = %source, "Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::trace!(source = %source, "Partition written to {}", path.display());
        Ok(())
    }
}

/// Load a partition, falling back to the backup if the file is corrupted
async fn load_with_recovery(path: &Path) -> Result<Partition> {
    match load(path).await {
        Ok(partition) => {
            tracing::debug!("Loaded {}: {} records", path.display(), partition.len());
            Ok(partition)
        }
        Err(Error::Json(e)) => {
            tracing::warn!(
                "Partition file {} appears corrupted: {}. Attempting recovery from backup.",
                path.display(),
                e
            );

            let backup = backup_path(path);
            if !backup.exists() {
                tracing::warn!("No backup file found. Starting with empty partition.");
                return Ok(Partition::default());
            }

            match load(&backup).await {
                Ok(partition) => {
                    tracing::info!("Recovered partition from backup: {} records", partition.len());
                    if let Err(e) = fs::copy(&backup, path).await {
                        tracing::error!("Failed to restore {} from backup: {}", path.display(), e);
                    }
                    Ok(partition)
                }
                Err(backup_err) => {
                    tracing::error!(
                        "Backup also corrupted: {}. Starting with empty partition.",
                        backup_err
                    );
                    Ok(Partition::default())
                }
            }
        }
        Err(e) => Err(e),
    }
}

async fn load(path: &Path) -> Result<Partition> {
    if !path.exists() {
        return Ok(Partition::default());
    }

    let content = fs::read(path).await.map_err(|e| {
        Error::store(format!("Failed to read {}: {}", path.display(), e))
    })?;
    let file: PartitionFileFormat = serde_json::from_slice(&content)?;

    if file.version != PARTITION_FILE_VERSION {
        tracing::warn!(
            "Partition file version mismatch: expected {}, got {}. Attempting to load anyway.",
            PARTITION_FILE_VERSION,
            file.version
        );
    }
    Ok(file.data)
}

fn backup_path(path: &Path) -> PathBuf {
    path.with_extension("backup")
}

impl FileLocalStore {
    /// Apply `mutate` to a copy of the partition, write it, then publish it
    ///
    /// Returns `None` without writing when `mutate` reports no change.
    async fn commit<T>(
        &self,
        source: &SourceKey,
        mutate: impl FnOnce(&mut Partition) -> Option<T>,
    ) -> Result<Option<T>> {
        let partition = self.partition(source).await?;
        let mut guard = partition.write().await;

        let mut next = Partition::clone(&guard);
        let Some(outcome) = mutate(&mut next) else {
            return Ok(None);
        };
        self.write_partition(source, &next).await?;
        *guard = next;
        Ok(Some(outcome))
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn count(&self, source: &SourceKey) -> Result<usize> {
        let partition = self.partition(source).await?;
        let guard = partition.read().await;
        Ok(guard.len())
    }

    async fn batch_import(&self, source: &SourceKey, records: Vec<StoredRecord>) -> Result<usize> {
        let changed = self
            .commit(source, |next| match next.merge(records) {
                0 => None,
                changed => Some(changed),
            })
            .await?;
        Ok(changed.unwrap_or(0))
    }

    async fn post_process(&self, source: &SourceKey) -> Result<()> {
        self.commit(source, |next| {
            next.recompute_summary();
            Some(())
        })
        .await?;
        Ok(())
    }

    async fn summary(&self, source: &SourceKey) -> Result<Option<SourceSummary>> {
        let partition = self.partition(source).await?;
        let guard = partition.read().await;
        Ok(guard.summary())
    }

    async fn last_sync(&self, source: &SourceKey) -> Result<Option<DateTime<Utc>>> {
        let partition = self.partition(source).await?;
        let guard = partition.read().await;
        Ok(guard.last_sync())
    }

    async fn set_last_sync(&self, source: &SourceKey, at: DateTime<Utc>) -> Result<()> {
        self.commit(source, |next| {
            next.set_last_sync(at);
            Some(())
        })
        .await?;
        Ok(())
    }

    async fn list_keys(&self, source: &SourceKey) -> Result<Vec<String>> {
        let partition = self.partition(source).await?;
        let guard = partition.read().await;
        Ok(guard.keys())
    }

    async fn flush(&self) -> Result<()> {
        // Every mutation is on disk before it is visible.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn port(number: u32, name: &str) -> StoredRecord {
        StoredRecord {
            key: number.to_string(),
            body: json!({ "portNumber": number, "portName": name }),
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_partitions() {
        let dir = tempdir().unwrap();
        let ports = SourceKey::new("port");

        let store = FileLocalStore::new(dir.path()).await.unwrap();
        assert_eq!(store.count(&ports).await.unwrap(), 0);
        assert_eq!(
            store
                .batch_import(&ports, vec![port(1, "Aden"), port(2, "Bari")])
                .await
                .unwrap(),
            2
        );
        assert!(store.partition_path(&ports).exists());

        // Load new instance and verify persistence
        let reopened = FileLocalStore::new(dir.path()).await.unwrap();
        assert_eq!(reopened.count(&ports).await.unwrap(), 2);
        assert_eq!(reopened.list_keys(&ports).await.unwrap(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let ports = SourceKey::new("port");

        let store = FileLocalStore::new(dir.path()).await.unwrap();
        store.batch_import(&ports, vec![port(1, "Aden")]).await.unwrap();
        // Second write creates the backup
        store.batch_import(&ports, vec![port(2, "Bari")]).await.unwrap();

        let path = store.partition_path(&ports);
        assert!(backup_path(&path).exists(), "Backup file should exist after write");
        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FileLocalStore::new(dir.path()).await.unwrap();
        // Backup holds the state before the last write
        assert_eq!(recovered.list_keys(&ports).await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn unchanged_import_does_not_rewrite() {
        let dir = tempdir().unwrap();
        let ports = SourceKey::new("port");

        let store = FileLocalStore::new(dir.path()).await.unwrap();
        store.batch_import(&ports, vec![port(1, "Aden")]).await.unwrap();
        assert_eq!(store.batch_import(&ports, vec![port(1, "Aden")]).await.unwrap(), 0);
        assert!(
            !backup_path(&store.partition_path(&ports)).exists(),
            "no second write happened"
        );
    }

    #[tokio::test]
    async fn summary_survives_restart() {
        let dir = tempdir().unwrap();
        let lights = SourceKey::new("light");

        let store = FileLocalStore::new(dir.path()).await.unwrap();
        store
            .batch_import(
                &lights,
                vec![StoredRecord {
                    key: "110/1".to_string(),
                    body: json!({ "latitude": 1.5, "longitude": 2.5 }),
                }],
            )
            .await
            .unwrap();
        store.post_process(&lights).await.unwrap();
        store.flush().await.unwrap();

        let reopened = FileLocalStore::new(dir.path()).await.unwrap();
        let summary = reopened.summary(&lights).await.unwrap().unwrap();
        assert_eq!(summary.record_count, 1);
        assert!(summary.bounds.is_some());
    }

    #[tokio::test]
    async fn failed_write_leaves_partition_unchanged() {
        let dir = tempdir().unwrap();
        let ports = SourceKey::new("port");
        let store = FileLocalStore::new(dir.path()).await.unwrap();

        // A directory in place of the temp file makes the write fail
        let blocker = store.partition_path(&ports).with_extension("tmp");
        fs::create_dir(&blocker).await.unwrap();

        let result = store.batch_import(&ports, vec![port(1, "Aden")]).await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(store.count(&ports).await.unwrap(), 0);
        assert!(store.list_keys(&ports).await.unwrap().is_empty());

        fs::remove_dir(&blocker).await.unwrap();
        let changed = store.batch_import(&ports, vec![port(1, "Aden")]).await.unwrap();
        assert_eq!(changed, 1, "retry sees the record as new");
        assert_eq!(store.count(&ports).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn last_sync_survives_restart() {
        let dir = tempdir().unwrap();
        let asam = SourceKey::new("asam");
        let at = chrono::Utc::now() - chrono::Duration::hours(3);

        let store = FileLocalStore::new(dir.path()).await.unwrap();
        assert_eq!(store.last_sync(&asam).await.unwrap(), None);
        store.set_last_sync(&asam, at).await.unwrap();

        let reopened = FileLocalStore::new(dir.path()).await.unwrap();
        assert_eq!(reopened.last_sync(&asam).await.unwrap(), Some(at));
        assert_eq!(reopened.count(&asam).await.unwrap(), 0);
    }
}
