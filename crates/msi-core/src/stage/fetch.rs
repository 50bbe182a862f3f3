//! Fetch stage: produce raw records from a bundle or the remote service

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::source::{DataSource, FetchContext, SyncPath};
use crate::traits::{BundleResource, RemoteEndpoint, SyncPolicy};

enum Origin {
    Bundle(Arc<dyn BundleResource>),
    Remote {
        endpoint: Arc<dyn RemoteEndpoint>,
        policy: Arc<dyn SyncPolicy>,
        context: FetchContext,
    },
}

/// Retrieves the records of one source from a single origin
///
/// Never fails: cancellation, an ineligible source, a missing bundle, and
/// transport or decode failures all produce an empty collection. Failures
/// are logged with the source key.
pub struct FetchStage<S: DataSource> {
    source: Arc<S>,
    origin: Origin,
}

impl<S: DataSource> FetchStage<S> {
    /// Read the source's bundled snapshot (bootstrap path)
    pub fn bundle(source: Arc<S>, bundle: Arc<dyn BundleResource>) -> Self {
        Self {
            source,
            origin: Origin::Bundle(bundle),
        }
    }

    /// Request increments from the remote service (incremental path)
    ///
    /// # Parameters
    ///
    /// - `endpoint`: Remote transport
    /// - `policy`: Eligibility predicate, asked once before any request
    /// - `context`: Last-sync time and clock used to build query windows
    pub fn remote(
        source: Arc<S>,
        endpoint: Arc<dyn RemoteEndpoint>,
        policy: Arc<dyn SyncPolicy>,
        context: FetchContext,
    ) -> Self {
        Self {
            source,
            origin: Origin::Remote {
                endpoint,
                policy,
                context,
            },
        }
    }

    /// Path this stage serves
    pub fn path(&self) -> SyncPath {
        match self.origin {
            Origin::Bundle(_) => SyncPath::Bootstrap,
            Origin::Remote { .. } => SyncPath::Incremental,
        }
    }

    /// Fetch and decode the records
    pub async fn run(self, token: CancellationToken) -> Vec<S::Record> {
        let key = &self.source.descriptor().key;
        let path = self.path();

        match self.fetch(&token).await {
            Ok(records) => {
                debug!(source = %key, ?path, count = records.len(), "fetch complete");
                records
            }
            Err(Error::Cancelled) => {
                debug!(source = %key, ?path, "fetch cancelled");
                Vec::new()
            }
            Err(e) => {
                error!(source = %key, ?path, error = %e, "fetch failed");
                Vec::new()
            }
        }
    }

    async fn fetch(&self, token: &CancellationToken) -> Result<Vec<S::Record>> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let descriptor = self.source.descriptor();

        match &self.origin {
            Origin::Bundle(bundle) => {
                let Some(spec) = &descriptor.bundle else {
                    debug!(source = %descriptor.key, "no bundled snapshot");
                    return Ok(Vec::new());
                };

                let bytes =
                    until_cancelled(token, bundle.load_resource(&spec.name, &spec.extension))
                        .await?;
                self.source.decode(&bytes)
            }
            Origin::Remote {
                endpoint,
                policy,
                context,
            } => {
                if !policy.should_sync(descriptor) {
                    info!(source = %descriptor.key, "sync not permitted by policy, skipping remote fetch");
                    return Ok(Vec::new());
                }

                // All-or-nothing: the first failing request discards earlier pages.
                let mut records = Vec::new();
                for request in self.source.remote_requests(context) {
                    debug!(
                        source = %descriptor.key,
                        endpoint = endpoint.endpoint_name(),
                        path = %request.path,
                        "requesting"
                    );
                    let bytes = until_cancelled(token, endpoint.get(&request)).await?;
                    records.extend(self.source.decode(&bytes)?);
                }
                Ok(records)
            }
        }
    }
}

/// Run `fut` unless the token is (or becomes) cancelled first
pub(crate) async fn until_cancelled<T>(
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
