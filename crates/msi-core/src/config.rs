//! Configuration types for the MSI sync engine
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::catalog::ALL_SOURCES;
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::scheduler::FacilitySettings;
use crate::source::SourceKey;

/// Main sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote MSI service
    pub remote: RemoteConfig,

    /// Bundled snapshots used for bootstrap
    pub bundle: BundleConfig,

    /// Local store
    pub store: StoreConfig,

    /// Background refresh
    pub scheduler: SchedulerConfig,

    /// Image cache
    pub cache: CacheConfig,

    /// Sources to sync; empty means every catalog source
    pub sources: Vec<SourceKey>,

    /// Never contact the remote service (bootstrap still runs)
    pub offline: bool,

    /// Per-subscriber event buffer
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self {
            remote: RemoteConfig::default(),
            bundle: BundleConfig::default(),
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
            sources: Vec::new(),
            offline: false,
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.remote.validate()?;
        self.store.validate()?;
        self.scheduler.validate()?;

        if self.bundle.dir.is_empty() {
            return Err(crate::Error::config("Bundle directory cannot be empty"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if let Some(unknown) = self
            .sources
            .iter()
            .find(|key| !ALL_SOURCES.contains(&key.as_str()))
        {
            return Err(crate::Error::config(format!("Unknown source: {}", unknown)));
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the publications API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RemoteConfig {
    /// Validate the remote configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(crate::Error::config(format!(
                "Remote base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Remote timeout must be > 0"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Bundle configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Directory holding `<name>.<ext>` snapshots
    #[serde(default = "default_bundle_dir")]
    pub dir: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            dir: default_bundle_dir(),
        }
    }
}

/// Local store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// One JSON file per source
    File {
        /// Store directory
        dir: String,
    },
}

impl StoreConfig {
    /// Validate the store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StoreConfig::File { dir } if dir.is_empty() => {
                Err(crate::Error::config("File store directory cannot be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Store type name (for logging)
    pub fn type_name(&self) -> &str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::File { .. } => "file",
        }
    }
}

/// Background refresh configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay of each renewal request after a run starts (in seconds)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Shortest delay the facility honors (in seconds)
    #[serde(default = "default_minimum_interval_secs")]
    pub minimum_interval_secs: u64,

    /// Execution budget per background run (in seconds)
    ///
    /// When it runs out, every stage of the source is cancelled and the run
    /// is reported as failed.
    #[serde(default = "default_expiration_secs")]
    pub expiration_secs: u64,

    /// Maximum number of sources with a pending request
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

impl SchedulerConfig {
    /// Validate the scheduler configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.refresh_interval_secs == 0 {
            return Err(crate::Error::config("Refresh interval must be > 0"));
        }
        if self.expiration_secs == 0 {
            return Err(crate::Error::config("Task expiration must be > 0"));
        }
        if self.max_pending_requests == 0 {
            return Err(crate::Error::config("Max pending requests must be > 0"));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Settings for the in-process facility
    pub fn facility_settings(&self) -> FacilitySettings {
        FacilitySettings {
            expiration: Duration::from_secs(self.expiration_secs),
            max_pending: self.max_pending_requests,
            minimum_interval: Duration::from_secs(self.minimum_interval_secs),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            minimum_interval_secs: default_minimum_interval_secs(),
            expiration_secs: default_expiration_secs(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

/// Image cache configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache directory; no cache when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_base_url() -> String {
    "https://msi.nga.mil/api".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_bundle_dir() -> String {
    "/usr/share/msi/bundles".to_string()
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_minimum_interval_secs() -> u64 {
    60
}

fn default_expiration_secs() -> u64 {
    30
}

fn default_max_pending_requests() -> usize {
    16
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.event_channel_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "store": { "type": "file", "dir": "/var/lib/msi" },
                "sources": ["light", "port"],
                "scheduler": { "expiration_secs": 10 }
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.store,
            StoreConfig::File {
                dir: "/var/lib/msi".to_string()
            }
        );
        assert_eq!(config.scheduler.expiration_secs, 10);
        assert_eq!(config.scheduler.refresh_interval_secs, 60);
        assert_eq!(config.remote.base_url, "https://msi.nga.mil/api");
        assert_eq!(config.event_channel_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_sources_and_bad_urls() {
        let mut config = SyncConfig::new();
        config.sources = vec![SourceKey::new("tides")];
        assert!(config.validate().is_err());

        let mut config = SyncConfig::new();
        config.remote.base_url = "ftp://msi.example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = SyncConfig::new();
        config.scheduler.expiration_secs = 0;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::new();
        config.store = StoreConfig::File { dir: String::new() };
        assert!(config.validate().is_err());
    }
}
