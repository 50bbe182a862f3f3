//! On-disk image cache

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::Result;
use crate::source::SourceKey;
use crate::traits::SourceCache;

/// Cache laid out as `<dir>/<source>/...`
#[derive(Debug, Clone)]
pub struct DirectoryCache {
    dir: PathBuf,
}

impl DirectoryCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding a source's cached files
    pub fn source_dir(&self, source: &SourceKey) -> PathBuf {
        self.dir.join(source.as_str())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SourceCache for DirectoryCache {
    async fn invalidate(&self, source: &SourceKey) -> Result<()> {
        let path = self.source_dir(source);
        match fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(source = %source, path = %path.display(), "image cache cleared");
                Ok(())
            }
            // Nothing cached yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn invalidate_removes_only_that_source() {
        let dir = tempdir().unwrap();
        let cache = DirectoryCache::new(dir.path());
        let lights = SourceKey::new("light");
        let beacons = SourceKey::new("radio_beacon");

        for source in [&lights, &beacons] {
            std::fs::create_dir_all(cache.source_dir(source)).unwrap();
            std::fs::write(cache.source_dir(source).join("tile.png"), b"png").unwrap();
        }

        cache.invalidate(&lights).await.unwrap();
        assert!(!cache.source_dir(&lights).exists());
        assert!(cache.source_dir(&beacons).join("tile.png").exists());
    }

    #[tokio::test]
    async fn invalidating_empty_cache_is_ok() {
        let dir = tempdir().unwrap();
        let cache = DirectoryCache::new(dir.path());
        cache.invalidate(&SourceKey::new("dgps_station")).await.unwrap();
    }
}
