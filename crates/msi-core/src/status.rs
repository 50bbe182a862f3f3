//! Observable per-source sync status
//!
//! The loading flag lives here rather than on the coordinator so that UI
//! layers and the daemon can watch every source through one channel. A
//! coordinator sets the flag through [`SyncStatusStore::begin_loading`] and
//! the returned guard clears it exactly once when dropped, whichever way the
//! invocation ends.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::source::SourceKey;
use crate::traits::LocalStore;

/// Status of one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStatus {
    /// An invocation is in progress
    pub loading: bool,
    /// Completion time of the last uncancelled invocation
    pub last_sync: Option<DateTime<Utc>>,
    /// Records changed by the last finished load stage
    pub last_changed: usize,
    /// Number of invocations that released the loading flag
    pub completed_loads: u64,
}

type StatusMap = HashMap<SourceKey, SourceStatus>;

/// Shared, observable status of every source
#[derive(Debug, Clone)]
pub struct SyncStatusStore {
    tx: Arc<watch::Sender<StatusMap>>,
}

impl SyncStatusStore {
    /// Create an empty status store
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusMap::new());
        Self { tx: Arc::new(tx) }
    }

    /// Set the loading flag for `source`
    ///
    /// The flag is cleared when the returned guard is dropped.
    pub fn begin_loading(&self, source: &SourceKey) -> LoadingGuard {
        self.tx.send_modify(|map| {
            map.entry(source.clone()).or_default().loading = true;
        });
        trace!(source = %source, "loading flag set");

        LoadingGuard {
            store: self.clone(),
            source: source.clone(),
        }
    }

    /// Whether `source` is currently loading
    pub fn is_loading(&self, source: &SourceKey) -> bool {
        self.tx.borrow().get(source).is_some_and(|status| status.loading)
    }

    /// Whether any source is currently loading
    pub fn any_loading(&self) -> bool {
        self.tx.borrow().values().any(|status| status.loading)
    }

    /// Status of one source (default if never seen)
    pub fn status(&self, source: &SourceKey) -> SourceStatus {
        self.tx.borrow().get(source).cloned().unwrap_or_default()
    }

    /// Completion time of the last uncancelled invocation
    pub fn last_sync(&self, source: &SourceKey) -> Option<DateTime<Utc>> {
        self.tx.borrow().get(source).and_then(|status| status.last_sync)
    }

    /// Status of every known source
    pub fn snapshot(&self) -> StatusMap {
        self.tx.borrow().clone()
    }

    /// Watch every status change
    pub fn subscribe(&self) -> watch::Receiver<StatusMap> {
        self.tx.subscribe()
    }

    /// Record the change count of a finished load stage
    pub fn record_load(&self, source: &SourceKey, changed: usize) {
        self.tx.send_modify(|map| {
            map.entry(source.clone()).or_default().last_changed = changed;
        });
    }

    /// Record a completed, uncancelled invocation
    pub fn record_sync(&self, source: &SourceKey, at: DateTime<Utc>) {
        self.tx.send_modify(|map| {
            map.entry(source.clone()).or_default().last_sync = Some(at);
        });
    }

    /// Seed `last_sync` from a persisted value unless one is already known
    pub fn restore_last_sync(&self, source: &SourceKey, at: DateTime<Utc>) {
        self.tx.send_if_modified(|map| {
            let status = map.entry(source.clone()).or_default();
            if status.last_sync.is_some() {
                return false;
            }
            status.last_sync = Some(at);
            true
        });
    }

    /// Seed `last_sync` for `sources` from the local store
    ///
    /// Returns how many sources had a persisted timestamp.
    pub async fn restore_from(
        &self,
        store: &dyn LocalStore,
        sources: impl IntoIterator<Item = SourceKey>,
    ) -> usize {
        let mut restored = 0;
        for source in sources {
            match store.last_sync(&source).await {
                Ok(Some(at)) => {
                    self.restore_last_sync(&source, at);
                    restored += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(source = %source, error = %e, "could not read persisted last sync"),
            }
        }
        restored
    }

    fn end_loading(&self, source: &SourceKey) {
        self.tx.send_modify(|map| {
            let status = map.entry(source.clone()).or_default();
            status.loading = false;
            status.completed_loads += 1;
        });
        trace!(source = %source, "loading flag cleared");
    }
}

impl Default for SyncStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears a source's loading flag on drop
#[derive(Debug)]
pub struct LoadingGuard {
    store: SyncStatusStore,
    source: SourceKey,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.store.end_loading(&self.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_clears_loading_exactly_once() {
        let store = SyncStatusStore::new();
        let asam = SourceKey::new("asam");

        let guard = store.begin_loading(&asam);
        assert!(store.is_loading(&asam));
        assert!(store.any_loading());

        drop(guard);
        let status = store.status(&asam);
        assert!(!status.loading);
        assert_eq!(status.completed_loads, 1);
    }

    #[test]
    fn sources_are_tracked_independently() {
        let store = SyncStatusStore::new();
        let _lights = store.begin_loading(&SourceKey::new("light"));

        assert!(!store.is_loading(&SourceKey::new("port")));
        assert_eq!(store.status(&SourceKey::new("port")), SourceStatus::default());
    }

    #[tokio::test]
    async fn watchers_observe_flag_changes() {
        let store = SyncStatusStore::new();
        let key = SourceKey::new("modu");
        let mut rx = store.subscribe();

        let guard = store.begin_loading(&key);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update()[&key].loading);

        store.record_sync(&key, Utc::now());
        drop(guard);
        rx.changed().await.unwrap();
        let map = rx.borrow_and_update();
        assert!(!map[&key].loading);
        assert!(map[&key].last_sync.is_some());
    }

    #[tokio::test]
    async fn restore_seeds_only_unknown_sources() {
        use crate::store::MemoryLocalStore;

        let persisted = MemoryLocalStore::new();
        let asam = SourceKey::new("asam");
        let modu = SourceKey::new("modu");
        let earlier = Utc::now() - chrono::Duration::days(2);
        persisted.set_last_sync(&asam, earlier).await.unwrap();
        persisted.set_last_sync(&modu, earlier).await.unwrap();

        let store = SyncStatusStore::new();
        let fresh = Utc::now();
        store.record_sync(&modu, fresh);

        let restored = store
            .restore_from(&persisted, [asam.clone(), modu.clone(), SourceKey::new("port")])
            .await;

        assert_eq!(restored, 2);
        assert_eq!(store.last_sync(&asam), Some(earlier));
        assert_eq!(store.last_sync(&modu), Some(fresh), "known value is kept");
        assert_eq!(store.last_sync(&SourceKey::new("port")), None);
    }
}
