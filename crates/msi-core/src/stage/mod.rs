//! Generic fetch and load stages
//!
//! One [`FetchStage`]/[`LoadStage`] pair serves every source; per-source
//! differences live behind [`DataSource`]. A pipeline is two
//! [`CancellableTask`]s run back to back on the source's serial queue: the
//! load task reads the fetch task's output once the queue starts it, which is
//! only after the fetch task has finished.

pub mod fetch;
pub mod load;

pub use fetch::FetchStage;
pub use load::LoadStage;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::source::{DataSource, SyncPath};
use crate::task::CancellableTask;
use crate::traits::LocalStore;

/// Fetch then load, as two queued tasks
pub struct Pipeline<S: DataSource> {
    /// Which path this pipeline serves
    pub path: SyncPath,
    /// Fetch task; its output is consumed by `load`
    pub fetch: Arc<CancellableTask<Vec<S::Record>>>,
    /// Load task; its output is the changed count
    pub load: Arc<CancellableTask<usize>>,
}

impl<S: DataSource> Pipeline<S> {
    /// Build the two tasks with children of `token`
    pub fn new(
        source: Arc<S>,
        stage: FetchStage<S>,
        store: Arc<dyn LocalStore>,
        token: &CancellationToken,
    ) -> Self {
        let path = stage.path();
        let key = source.descriptor().key.clone();
        let label = match path {
            SyncPath::Bootstrap => "bootstrap",
            SyncPath::Incremental => "incremental",
        };

        let fetch = CancellableTask::new(
            format!("{key}:{label}:fetch"),
            token.child_token(),
            move |token| stage.run(token),
        );

        let fetched = Arc::clone(&fetch);
        let load = CancellableTask::new(
            format!("{key}:{label}:load"),
            token.child_token(),
            move |token| async move {
                let records = fetched.take_output().unwrap_or_default();
                LoadStage::new(source, store, records).run(token).await
            },
        );

        Self { path, fetch, load }
    }

    /// Whether either task observed cancellation
    pub fn was_cancelled(&self) -> bool {
        self.fetch.is_cancelled() || self.load.is_cancelled()
    }
}
