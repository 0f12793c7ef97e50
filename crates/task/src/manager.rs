//! The task manager — owns the container cache and drives plugins.
//!
//! `init_task` is invoked by the consignment service's pre-commit callback,
//! inside the creation transaction, so a registration failure aborts the
//! whole creation.  `execute_task` serves external interactions and
//! reconstructs containers from the database on cache miss.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use db::model::NodeState;
use db::{Store, TemplateProvider};
use plugins::{ExecutionRequest, ExecutionResponse, Plugin, PluginFactory, RenderInfo};

use crate::cache::ContainerCache;
use crate::container::{Container, ContainerState, SharedGlobalContext};
use crate::error::TaskError;
use crate::local_state::LocalStateManager;
use crate::notification::{Notification, NotificationSender};

/// Everything the task manager needs to activate one node.
pub struct InitTaskRequest {
    pub consignment_id: Uuid,
    pub task_id: Uuid,
    /// The node template the task was materialized from.
    pub step_id: Uuid,
    /// Plugin type tag from the template.
    pub task_type: String,
    /// Plugin-specific config blob from the template.
    pub config: Value,
    /// Shared handle onto the consignment's global context.
    pub global_context: SharedGlobalContext,
}

pub struct TaskManager {
    cache: ContainerCache,
    store: Arc<dyn Store>,
    templates: Arc<dyn TemplateProvider>,
    factory: Arc<dyn PluginFactory>,
    notifications: NotificationSender,
}

impl TaskManager {
    pub fn new(
        store: Arc<dyn Store>,
        templates: Arc<dyn TemplateProvider>,
        factory: Arc<dyn PluginFactory>,
        notifications: NotificationSender,
        cache_capacity: usize,
    ) -> Self {
        Self {
            cache: ContainerCache::new(cache_capacity),
            store,
            templates,
            factory,
            notifications,
        }
    }

    /// Activate a newly READY node: build its plugin, start it, and insert
    /// the container into the cache.
    ///
    /// Runs inside the consignment creation transaction via the pre-commit
    /// callback, so any error here rolls the whole creation back.  A plugin
    /// panic during start is recovered like one during execute: it is
    /// reported as [`TaskError::PluginPanic`] and the container is never
    /// cached.
    #[instrument(skip(self, request), fields(task_id = %request.task_id))]
    pub async fn init_task(&self, request: InitTaskRequest) -> Result<ExecutionResponse, TaskError> {
        let local = LocalStateManager::load(Arc::clone(&self.store), request.task_id).await?;
        let plugin_state = match self.store.get_plugin_state(request.task_id).await {
            Ok(state) => state,
            Err(db::DbError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let mut plugin = self.factory.build_executor(&request.task_type, &request.config)?;
        let state = Arc::new(ContainerState::new(
            request.task_id,
            request.consignment_id,
            request.step_id,
            request.global_context,
            local,
            plugin_state,
            NodeState::Ready,
            Arc::clone(&self.store),
        ));
        plugin.init(state.clone());
        let container = Arc::new(Container::new(state, plugin));

        let outcome = AssertUnwindSafe(container.start()).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e.into()),
            Err(panic) => {
                warn!(task_id = %request.task_id, "plugin panicked during start; task not registered");
                return Err(TaskError::PluginPanic(panic_message(panic.as_ref())));
            }
        };

        self.forward(request.task_id, &container, &response).await?;
        self.cache.set(request.task_id, container);

        Ok(response)
    }

    /// Drive an external interaction with a task.
    ///
    /// Plugin errors are returned to the caller and do not emit a
    /// notification, so the node's workflow state does not advance.  A
    /// plugin panic is recovered, reported as [`TaskError::PluginPanic`],
    /// and evicts the container.
    #[instrument(skip(self, request), fields(action = %request.action))]
    pub async fn execute_task(
        &self,
        task_id: Uuid,
        request: ExecutionRequest,
    ) -> Result<ExecutionResponse, TaskError> {
        let container = self.lookup_or_rebuild(task_id).await?;

        let state = container.task_state().await;
        if !matches!(state, NodeState::Ready | NodeState::InProgress) {
            return Err(TaskError::InvalidState { task_id, state });
        }

        let outcome = AssertUnwindSafe(container.execute(&request)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(e.into()),
            Err(panic) => {
                warn!(%task_id, "plugin panicked during execute; evicting container");
                self.cache.delete(task_id);
                return Err(TaskError::PluginPanic(panic_message(panic.as_ref())));
            }
        };

        self.forward(task_id, &container, &response).await?;
        Ok(response)
    }

    /// Read-only payload for rendering a task.
    pub async fn render_info(&self, task_id: Uuid) -> Result<RenderInfo, TaskError> {
        let container = self.lookup_or_rebuild(task_id).await?;
        Ok(container.render_info().await?)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    async fn lookup_or_rebuild(&self, task_id: Uuid) -> Result<Arc<Container>, TaskError> {
        if let Some(container) = self.cache.get(task_id) {
            return Ok(container);
        }
        self.rebuild_container(task_id).await
    }

    /// Reconstruct a container from the database after a cache miss or
    /// eviction.
    async fn rebuild_container(&self, task_id: Uuid) -> Result<Arc<Container>, TaskError> {
        let node = match self.store.get_node(task_id).await {
            Ok(node) => node,
            Err(db::DbError::NotFound) => return Err(TaskError::NotFound(task_id)),
            Err(e) => return Err(e.into()),
        };
        let template = self.templates.node_template_by_id(node.template_id).await?;
        let consignment = self.store.get_consignment(node.consignment_id).await?;

        debug!(%task_id, state = %node.state, "rebuilding container from store");

        let local = LocalStateManager::from_map(Arc::clone(&self.store), task_id, node.local_state);
        let global: SharedGlobalContext = Arc::new(RwLock::new(consignment.global_context));

        let mut plugin = self.factory.build_executor(&template.task_type, &template.config)?;
        let state = Arc::new(ContainerState::new(
            task_id,
            node.consignment_id,
            template.id,
            global,
            local,
            node.plugin_state,
            node.state,
            Arc::clone(&self.store),
        ));
        plugin.init(state.clone());

        let container = Arc::new(Container::new(state, plugin));
        self.cache.set(task_id, Arc::clone(&container));
        Ok(container)
    }

    /// Push the plugin's reported transition onto the notification channel
    /// and mirror it into the container's cached workflow state.  Responses
    /// with nothing to report are not forwarded.
    async fn forward(
        &self,
        task_id: Uuid,
        container: &Container,
        response: &ExecutionResponse,
    ) -> Result<(), TaskError> {
        if !response.needs_notification() {
            return Ok(());
        }

        if let Some(new_state) = response.new_state {
            container.set_task_state(new_state.into()).await;
        }

        self.notifications
            .send(Notification {
                task_id,
                updated_state: response.new_state,
                append_global_context: response.append_global_context.clone(),
                extended_state: response.extended_state.clone(),
            })
            .await
            .map_err(|_| TaskError::NotificationChannelClosed)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
