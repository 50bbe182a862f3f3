// # Source Cache Trait
//
// Image or auxiliary caches keyed by source. The coordinator invalidates a
// source's cache when a load changes records and the source declares one.

use async_trait::async_trait;

use crate::error::Result;
use crate::source::SourceKey;

/// Trait for per-source cache implementations
#[async_trait]
pub trait SourceCache: Send + Sync {
    /// Drop everything cached for `source`
    async fn invalidate(&self, source: &SourceKey) -> Result<()>;
}
