//! # Service registry: explicit "shut everything down" handle.
//!
//! Services built with [`ServiceBuilder::with_registry`](crate::ServiceBuilder::with_registry)
//! enroll here. The registry only holds weak references, so it never keeps a
//! service alive; dead entries are pruned on every call.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Something that can be stopped through a registry.
pub(crate) trait Stop: Send + Sync {
    fn stop(&self);
}

struct Entry {
    namespace: Arc<str>,
    service: Weak<dyn Stop>,
}

/// Set of services that can be stopped together.
///
/// Cheap to clone; every clone refers to the same set.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, namespace: Arc<str>, service: Weak<dyn Stop>) {
        let mut entries = self.lock();
        entries.retain(|e| e.service.strong_count() > 0);
        entries.push(Entry { namespace, service });
    }

    /// Number of registered services still alive.
    pub fn len(&self) -> usize {
        let mut entries = self.lock();
        entries.retain(|e| e.service.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every live registered service and empties the registry.
    ///
    /// Returns the number of services stopped.
    pub fn shutdown_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.lock());
        let mut stopped = 0;
        for entry in entries {
            if let Some(service) = entry.service.upgrade() {
                tracing::debug!(namespace = %entry.namespace, "stopping service");
                service.stop();
                stopped += 1;
            }
        }
        tracing::debug!(stopped, "registry shut down");
        stopped
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.lock();
        let names: Vec<&str> = entries
            .iter()
            .filter(|e| e.service.strong_count() > 0)
            .map(|e| &*e.namespace)
            .collect();
        f.debug_struct("ServiceRegistry")
            .field("services", &names)
            .finish()
    }
}
