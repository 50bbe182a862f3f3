//! Bundled snapshot readers

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Error, Result};
use crate::traits::BundleResource;

/// Reads `<dir>/<name>.<extension>`
#[derive(Debug, Clone)]
pub struct DirectoryBundle {
    dir: PathBuf,
}

impl DirectoryBundle {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path a resource would be read from
    pub fn resource_path(&self, name: &str, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, extension))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl BundleResource for DirectoryBundle {
    async fn load_resource(&self, name: &str, extension: &str) -> Result<Vec<u8>> {
        let path = self.resource_path(name, extension);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::not_found(format!(
                "bundle resource {}",
                path.display()
            ))),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// In-memory bundle, for embedded snapshots and tests
#[derive(Debug, Clone, Default)]
pub struct StaticBundle {
    resources: HashMap<(String, String), Vec<u8>>,
}

impl StaticBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a resource
    pub fn with_resource(
        mut self,
        name: impl Into<String>,
        extension: impl Into<String>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        self.resources
            .insert((name.into(), extension.into()), contents.into());
        self
    }
}

#[async_trait]
impl BundleResource for StaticBundle {
    async fn load_resource(&self, name: &str, extension: &str) -> Result<Vec<u8>> {
        self.resources
            .get(&(name.to_string(), extension.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("bundle resource {}.{}", name, extension)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn directory_bundle_reads_named_resource() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("asam.json"), br#"{"asam":[]}"#).unwrap();

        let bundle = DirectoryBundle::new(dir.path());
        assert_eq!(
            bundle.load_resource("asam", "json").await.unwrap(),
            br#"{"asam":[]}"#.to_vec()
        );
        assert!(matches!(
            bundle.load_resource("modu", "json").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn static_bundle_matches_name_and_extension() {
        let bundle = StaticBundle::new().with_resource("ports", "json", "[]");
        assert!(bundle.load_resource("ports", "json").await.is_ok());
        assert!(matches!(
            bundle.load_resource("ports", "geojson").await,
            Err(Error::NotFound(_))
        ));
    }
}
