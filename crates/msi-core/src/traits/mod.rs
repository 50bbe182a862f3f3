//! Collaborator interfaces consumed by the sync engine
//!
//! - [`LocalStore`]: partitioned record storage with upsert-by-natural-key
//! - [`RemoteEndpoint`]: read-only access to the remote service
//! - [`BundleResource`]: bundled snapshots used for bootstrap
//! - [`SyncPolicy`]: app-level eligibility predicate
//! - [`SourceCache`]: auxiliary caches keyed by source

pub mod bundle;
pub mod cache;
pub mod local_store;
pub mod policy;
pub mod remote;

pub use bundle::BundleResource;
pub use cache::SourceCache;
pub use local_store::{Bounds, LocalStore, SourceSummary, StoredRecord};
pub use policy::{AlwaysSync, SettingsPolicy, SyncPolicy};
pub use remote::{OfflineEndpoint, RemoteEndpoint, RemoteRequest};
