//! Fixed-capacity LRU cache of active containers, keyed by task id.
//!
//! Eviction is silent: the container is simply dropped from the cache and
//! reconstructed from the database on the next access.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use tracing::debug;
use uuid::Uuid;

use crate::container::Container;

/// Default capacity when none (or zero) is configured.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

pub struct ContainerCache {
    inner: Mutex<LruCache<Uuid, Arc<Container>>>,
}

impl ContainerCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CACHE_CAPACITY } else { capacity };
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<Uuid, Arc<Container>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retrieve a container and mark it most recently used.
    pub fn get(&self, task_id: Uuid) -> Option<Arc<Container>> {
        self.lock().get(&task_id).cloned()
    }

    /// Insert or overwrite a container, evicting the least recently used
    /// entry if the cache is full.
    pub fn set(&self, task_id: Uuid, container: Arc<Container>) {
        let evicted = self.lock().push(task_id, container);
        if let Some((evicted_id, _)) = evicted {
            if evicted_id != task_id {
                debug!(task_id = %evicted_id, "evicted container from cache");
            }
        }
    }

    pub fn delete(&self, task_id: Uuid) {
        self.lock().pop(&task_id);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
