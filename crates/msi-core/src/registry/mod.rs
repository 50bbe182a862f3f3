//! Coordinator registry
//!
//! Keyed lookup of the type-erased coordinators built at startup. The daemon
//! registers every enabled source once; the scheduler and foreground
//! triggers look coordinators up by source key.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use msi_core::registry::CoordinatorRegistry;
//!
//! let registry = CoordinatorRegistry::new();
//! registry.register(Arc::new(SourceCoordinator::new(catalog::asam(), env.clone())));
//!
//! let invocations = registry.fetch_all();
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

use crate::coordinator::{Coordinator, SyncInvocation};
use crate::error::{Error, Result};
use crate::source::{DataSourceDescriptor, SourceKey};

/// Registry of coordinators keyed by source
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct CoordinatorRegistry {
    coordinators: RwLock<BTreeMap<SourceKey, Arc<dyn Coordinator>>>,
}

impl CoordinatorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a coordinator under its source key
    ///
    /// Registering the same key twice replaces the earlier coordinator.
    pub fn register(&self, coordinator: Arc<dyn Coordinator>) {
        let key = coordinator.descriptor().key.clone();
        let replaced = self
            .coordinators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), coordinator)
            .is_some();

        if replaced {
            warn!(source = %key, "coordinator replaced");
        } else {
            debug!(source = %key, "coordinator registered");
        }
    }

    /// Look up a coordinator
    ///
    /// # Returns
    ///
    /// - `Ok(Arc<dyn Coordinator>)`: Registered coordinator
    /// - `Err(Error::NotFound)`: No coordinator for this source
    pub fn get(&self, source: &SourceKey) -> Result<Arc<dyn Coordinator>> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no coordinator for source '{}'", source)))
    }

    /// Descriptor of a registered source
    pub fn descriptor(&self, source: &SourceKey) -> Option<DataSourceDescriptor> {
        self.get(source).ok().map(|c| c.descriptor().clone())
    }

    /// Registered source keys in sorted order
    pub fn list_sources(&self) -> Vec<SourceKey> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Check if a source is registered
    pub fn has_source(&self, source: &SourceKey) -> bool {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(source)
    }

    /// Every registered coordinator
    pub fn coordinators(&self) -> Vec<Arc<dyn Coordinator>> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Start one invocation per source; sources run concurrently
    pub fn fetch_all(&self) -> Vec<SyncInvocation> {
        self.coordinators().iter().map(|c| c.fetch()).collect()
    }

    /// Cancel every live invocation of every source
    pub fn cancel_all(&self) {
        for coordinator in self.coordinators() {
            coordinator.cancel_all();
        }
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no source is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::DataSourceDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Inert {
        descriptor: DataSourceDescriptor,
        cancels: AtomicUsize,
    }

    impl Coordinator for Inert {
        fn descriptor(&self) -> &DataSourceDescriptor {
            &self.descriptor
        }

        fn fetch(&self) -> SyncInvocation {
            unreachable!("not used by registry tests")
        }

        fn cancel_all(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn inert(key: &str) -> Arc<Inert> {
        Arc::new(Inert {
            descriptor: DataSourceDescriptor::new(key, key.to_uppercase()),
            cancels: AtomicUsize::new(0),
        })
    }

    #[test]
    fn registered_sources_are_listed_sorted() {
        let registry = CoordinatorRegistry::new();
        registry.register(inert("port"));
        registry.register(inert("asam"));

        assert_eq!(
            registry.list_sources(),
            vec![SourceKey::new("asam"), SourceKey::new("port")]
        );
        assert!(registry.has_source(&SourceKey::new("port")));
        assert_eq!(
            registry.descriptor(&SourceKey::new("asam")).map(|d| d.display_name),
            Some("ASAM".to_string())
        );
    }

    #[test]
    fn unknown_source_is_not_found() {
        let registry = CoordinatorRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(&SourceKey::new("light")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn cancel_all_reaches_every_coordinator() {
        let registry = CoordinatorRegistry::new();
        let a = inert("asam");
        let b = inert("modu");
        registry.register(a.clone());
        registry.register(b.clone());

        registry.cancel_all();
        assert_eq!(a.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(b.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn re_registering_replaces() {
        let registry = CoordinatorRegistry::new();
        registry.register(inert("asam"));
        registry.register(inert("asam"));
        assert_eq!(registry.len(), 1);
    }
}
