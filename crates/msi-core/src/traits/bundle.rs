// # Bundle Resource Trait
//
// Bundled snapshots shipped with the application. Used only for the
// bootstrap path, when a source has no local records yet.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for bundle resource implementations
#[async_trait]
pub trait BundleResource: Send + Sync {
    /// Read `name.extension`
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<u8>)`: Resource contents
    /// - `Err(Error::NotFound)`: No such resource
    async fn load_resource(&self, name: &str, extension: &str) -> Result<Vec<u8>>;
}
