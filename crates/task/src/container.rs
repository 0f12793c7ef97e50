//! The per-node runtime container.
//!
//! One container wraps one plugin instance and mediates every access the
//! plugin makes to the outside world: the local key-value store, the
//! cached plugin state, the node's workflow state, and the advisory view
//! of the consignment's global context.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use db::model::{GlobalContext, NodeState};
use db::Store;
use plugins::{
    ExecutionRequest, ExecutionResponse, Plugin, PluginApi, PluginError, RenderInfo,
};

use crate::local_state::LocalStateManager;

/// A live handle onto a consignment's global context.
///
/// All containers registered in one batch share the same handle.  Reads
/// are advisory point-in-time views; the consignment row in the database
/// remains authoritative.
pub type SharedGlobalContext = Arc<RwLock<GlobalContext>>;

/// The state side of a container, handed to the plugin as its
/// [`PluginApi`].  One reader/writer lock guards the local KV map, the
/// plugin-state cache and the workflow-state field.
pub struct ContainerState {
    task_id: Uuid,
    consignment_id: Uuid,
    step_id: Uuid,
    global: SharedGlobalContext,
    store: Arc<dyn Store>,
    inner: RwLock<ContainerInner>,
}

struct ContainerInner {
    task_state: NodeState,
    plugin_state: Option<String>,
    local: LocalStateManager,
}

impl ContainerState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: Uuid,
        consignment_id: Uuid,
        step_id: Uuid,
        global: SharedGlobalContext,
        local: LocalStateManager,
        plugin_state: Option<String>,
        task_state: NodeState,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            task_id,
            consignment_id,
            step_id,
            global,
            store,
            inner: RwLock::new(ContainerInner { task_state, plugin_state, local }),
        }
    }

    pub fn step_id(&self) -> Uuid {
        self.step_id
    }
}

#[async_trait]
impl PluginApi for ContainerState {
    fn task_id(&self) -> Uuid {
        self.task_id
    }

    fn consignment_id(&self) -> Uuid {
        self.consignment_id
    }

    async fn task_state(&self) -> NodeState {
        self.inner.read().await.task_state
    }

    async fn set_task_state(&self, state: NodeState) {
        self.inner.write().await.task_state = state;
    }

    async fn plugin_state(&self) -> Option<String> {
        self.inner.read().await.plugin_state.clone()
    }

    async fn set_plugin_state(&self, state: &str) -> Result<(), PluginError> {
        let mut inner = self.inner.write().await;
        inner.plugin_state = Some(state.to_string());
        self.store.update_plugin_state(self.task_id, state).await?;
        Ok(())
    }

    async fn read_local(&self, key: &str) -> Option<Value> {
        self.inner.read().await.local.get(key)
    }

    async fn write_local(&self, key: &str, value: Value) -> Result<(), PluginError> {
        let mut inner = self.inner.write().await;
        inner.local.set(key, value).await?;
        Ok(())
    }

    async fn read_global(&self, key: &str) -> Option<Value> {
        self.global.read().await.get(key).cloned()
    }
}

/// A plugin instance plus its state, as stored in the container cache.
pub struct Container {
    state: Arc<ContainerState>,
    plugin: Box<dyn Plugin>,
}

impl Container {
    /// Build a container around an already-initialized plugin.
    pub fn new(state: Arc<ContainerState>, plugin: Box<dyn Plugin>) -> Self {
        Self { state, plugin }
    }

    pub fn task_id(&self) -> Uuid {
        self.state.task_id()
    }

    pub fn consignment_id(&self) -> Uuid {
        self.state.consignment_id()
    }

    pub async fn task_state(&self) -> NodeState {
        self.state.task_state().await
    }

    pub async fn set_task_state(&self, state: NodeState) {
        self.state.set_task_state(state).await;
    }

    pub async fn start(&self) -> Result<ExecutionResponse, PluginError> {
        self.plugin.start().await
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, PluginError> {
        self.plugin.execute(request).await
    }

    pub async fn render_info(&self) -> Result<RenderInfo, PluginError> {
        self.plugin.render_info().await
    }
}
