// # Sync Policy
//
// App-level eligibility predicate (connectivity, user settings). The engine
// only asks; it never decides policy itself.

use std::collections::BTreeSet;

use crate::source::{DataSourceDescriptor, SourceKey};

/// Decides whether a source may contact the network right now
pub trait SyncPolicy: Send + Sync {
    /// `false` makes the remote fetch return no records without a request
    fn should_sync(&self, source: &DataSourceDescriptor) -> bool;
}

/// Policy that allows every source
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysSync;

impl SyncPolicy for AlwaysSync {
    fn should_sync(&self, _source: &DataSourceDescriptor) -> bool {
        true
    }
}

/// Policy driven by configuration: an offline switch and an optional allow-list
#[derive(Debug, Clone, Default)]
pub struct SettingsPolicy {
    offline: bool,
    enabled: Option<BTreeSet<SourceKey>>,
}

impl SettingsPolicy {
    /// Allow every source unless `offline`
    pub fn new(offline: bool) -> Self {
        Self {
            offline,
            enabled: None,
        }
    }

    /// Restrict network access to the given sources; an empty list allows all
    pub fn with_enabled_sources(mut self, sources: impl IntoIterator<Item = SourceKey>) -> Self {
        let set: BTreeSet<SourceKey> = sources.into_iter().collect();
        self.enabled = if set.is_empty() { None } else { Some(set) };
        self
    }
}

impl SyncPolicy for SettingsPolicy {
    fn should_sync(&self, source: &DataSourceDescriptor) -> bool {
        if self.offline {
            return false;
        }
        self.enabled
            .as_ref()
            .is_none_or(|enabled| enabled.contains(&source.key))
    }
}
