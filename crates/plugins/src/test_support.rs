//! In-crate `PluginApi` fake for plugin unit tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use db::model::{GlobalContext, NodeState};

use crate::contract::PluginApi;
use crate::PluginError;

pub struct TestApi {
    task_id: Uuid,
    consignment_id: Uuid,
    inner: Mutex<TestApiInner>,
}

struct TestApiInner {
    task_state: NodeState,
    plugin_state: Option<String>,
    local: GlobalContext,
    global: GlobalContext,
}

impl TestApi {
    pub fn new(task_state: NodeState) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            consignment_id: Uuid::new_v4(),
            inner: Mutex::new(TestApiInner {
                task_state,
                plugin_state: None,
                local: GlobalContext::new(),
                global: GlobalContext::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TestApiInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_value(&self, key: &str) -> Option<Value> {
        self.lock().local.get(key).cloned()
    }

    pub fn plugin_state_value(&self) -> Option<String> {
        self.lock().plugin_state.clone()
    }
}

#[async_trait]
impl PluginApi for TestApi {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn consignment_id(&self) -> Uuid {
        self.consignment_id
    }

    async fn task_state(&self) -> NodeState {
        self.lock().task_state
    }

    async fn set_task_state(&self, state: NodeState) {
        self.lock().task_state = state;
    }

    async fn plugin_state(&self) -> Option<String> {
        self.lock().plugin_state.clone()
    }

    async fn set_plugin_state(&self, state: &str) -> Result<(), PluginError> {
        self.lock().plugin_state = Some(state.to_string());
        Ok(())
    }

    async fn read_local(&self, key: &str) -> Option<Value> {
        self.lock().local.get(key).cloned()
    }

    async fn write_local(&self, key: &str, value: Value) -> Result<(), PluginError> {
        self.lock().local.insert(key.to_string(), value);
        Ok(())
    }

    async fn read_global(&self, key: &str) -> Option<Value> {
        self.lock().global.get(key).cloned()
    }
}
