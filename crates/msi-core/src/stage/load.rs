//! Load stage: merge fetched records into the local store

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::source::DataSource;
use crate::traits::{LocalStore, StoredRecord};

/// Merges one fetched collection and reports the changed count
///
/// Cancellation is checked once, immediately before the merge; a merge that
/// has started is allowed to complete. Store failures are logged and reported
/// as zero changes.
pub struct LoadStage<S: DataSource> {
    source: Arc<S>,
    store: Arc<dyn LocalStore>,
    records: Vec<S::Record>,
}

impl<S: DataSource> LoadStage<S> {
    /// Create a load stage for `records`
    pub fn new(source: Arc<S>, store: Arc<dyn LocalStore>, records: Vec<S::Record>) -> Self {
        Self {
            source,
            store,
            records,
        }
    }

    /// Merge the records
    ///
    /// # Returns
    ///
    /// Number of records inserted or changed (0 on cancellation or failure)
    pub async fn run(self, token: CancellationToken) -> usize {
        let key = &self.source.descriptor().key;

        if token.is_cancelled() {
            debug!(source = %key, "load cancelled before merge");
            return 0;
        }
        if self.records.is_empty() {
            debug!(source = %key, "nothing to merge");
            return 0;
        }

        match self.merge().await {
            Ok(changed) => {
                info!(source = %key, received = self.records.len(), changed, "merge complete");
                changed
            }
            Err(e) => {
                error!(source = %key, error = %e, "merge failed");
                0
            }
        }
    }

    async fn merge(&self) -> Result<usize> {
        let descriptor = self.source.descriptor();
        let batch = self
            .records
            .iter()
            .map(StoredRecord::from_record)
            .collect::<Result<Vec<_>>>()?;

        let changed = self.store.batch_import(&descriptor.key, batch).await?;

        if changed > 0 && descriptor.post_process {
            // Part of the stage: completes before the stage reports Finished.
            if let Err(e) = self.store.post_process(&descriptor.key).await {
                warn!(source = %descriptor.key, error = %e, "post-processing failed");
            }
        }
        Ok(changed)
    }
}
