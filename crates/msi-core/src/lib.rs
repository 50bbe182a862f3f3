// # msi-core
//
// Core library for the maritime safety information sync engine.
//
// ## Architecture Overview
//
// This library keeps a local store of maritime reference datasets in sync
// with bundled snapshots and the remote MSI service:
// - **CancellableTask / SerialQueue**: Units of work with an observable
//   lifecycle, run one at a time per source
// - **FetchStage / LoadStage**: Generic fetch and merge stages, parameterized
//   by a `DataSource`
// - **SourceCoordinator**: Per-source bootstrap-vs-incremental state machine
// - **BackgroundScheduler**: Periodic re-invocation with expiration handling
// - **EventBus / SyncStatusStore**: Typed notifications and observable
//   loading flags
// - **LocalStore / RemoteEndpoint / BundleResource**: Collaborator traits
//
// ## Design Principles
//
// 1. **Stages never fail**: Failures become empty results and log lines
// 2. **Guaranteed release**: The loading flag is cleared on every exit path
// 3. **One slot per source**: Sources run concurrently, stages of one source never do
// 4. **Library-First**: The daemon is a thin wiring layer over this crate

pub mod bundle;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod stage;
pub mod status;
pub mod store;
pub mod task;
pub mod traits;

// Re-export core types for convenience
pub use bundle::{DirectoryBundle, StaticBundle};
pub use cache::DirectoryCache;
pub use config::{StoreConfig, SyncConfig};
pub use coordinator::{Coordinator, SourceCoordinator, SyncEnvironment, SyncInvocation, SyncReport};
pub use error::{Error, Result, SchedulingError};
pub use events::{EventBus, EventSubscription, SyncEvent};
pub use registry::CoordinatorRegistry;
pub use scheduler::{BackgroundScheduler, BackgroundTaskFacility, TokioBackgroundFacility};
pub use source::{DataSource, DataSourceDescriptor, SourceKey, SyncPath, SyncRecord};
pub use status::{SourceStatus, SyncStatusStore};
pub use store::{FileLocalStore, MemoryLocalStore};
pub use task::{CancellableTask, SerialQueue, TaskState, TaskStatus};
pub use traits::{BundleResource, LocalStore, RemoteEndpoint, SourceCache, SyncPolicy};
