//! Per-node local key-value state with write-through persistence.
//!
//! The whole map is serialized as a single JSON blob on the node row on
//! every write; reads are served from the in-memory cache.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use db::model::GlobalContext;
use db::{DbError, Store};

pub struct LocalStateManager {
    store: Arc<dyn Store>,
    task_id: Uuid,
    cache: GlobalContext,
}

impl LocalStateManager {
    /// Load the node's persisted local state.  A missing row is not an
    /// error; the node may still be inside an uncommitted creation
    /// transaction, so we start with an empty map.
    pub async fn load(store: Arc<dyn Store>, task_id: Uuid) -> Result<Self, DbError> {
        let cache = match store.get_local_state(task_id).await {
            Ok(state) => state,
            Err(DbError::NotFound) => GlobalContext::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { store, task_id, cache })
    }

    /// Build from an already-fetched blob (container reconstruction path).
    pub fn from_map(store: Arc<dyn Store>, task_id: Uuid, cache: GlobalContext) -> Self {
        Self { store, task_id, cache }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).cloned()
    }

    /// Set a value and persist the whole map.
    pub async fn set(&mut self, key: &str, value: Value) -> Result<(), DbError> {
        self.cache.insert(key.to_string(), value);
        self.store
            .update_local_state(self.task_id, self.cache.clone())
            .await
    }
}
