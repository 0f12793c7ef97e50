//! Workflow manager — registers READY nodes with the task manager and
//! consumes the notification channel.
//!
//! The listener is the single consumer of the channel.  Every failure in
//! the loop is logged and skipped: the transaction left the database
//! consistent, and there is deliberately no retry here.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use db::model::{GlobalContext, WorkflowNode};
use db::TemplateProvider;
use task::{InitTaskRequest, Notification, TaskManager};

use crate::consignment::{ConsignmentService, UpdateNodeRequest};
use crate::error::EngineError;

/// Registers workflow nodes with the task manager.
///
/// Shared between the consignment service's pre-commit callback and the
/// notification listener, so both paths activate nodes identically.
pub struct TaskRegistrar {
    task_manager: Arc<TaskManager>,
    templates: Arc<dyn TemplateProvider>,
}

impl TaskRegistrar {
    pub fn new(task_manager: Arc<TaskManager>, templates: Arc<dyn TemplateProvider>) -> Self {
        Self { task_manager, templates }
    }

    /// Initialize a task for every node.  All nodes in one batch share a
    /// single live handle onto the given global context.
    pub async fn register_nodes(
        &self,
        nodes: &[WorkflowNode],
        global_context: GlobalContext,
    ) -> Result<(), EngineError> {
        let shared = Arc::new(RwLock::new(global_context));
        for node in nodes {
            let template = self.templates.node_template_by_id(node.template_id).await?;
            let response = self
                .task_manager
                .init_task(InitTaskRequest {
                    consignment_id: node.consignment_id,
                    task_id: node.id,
                    step_id: template.id,
                    task_type: template.task_type.clone(),
                    config: template.config.clone(),
                    global_context: Arc::clone(&shared),
                })
                .await?;
            info!(task_id = %node.id, message = %response.message,
                  "registered workflow node with task manager");
        }
        Ok(())
    }
}

/// Handle to the running notification listener.
pub struct ListenerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ListenerHandle {
    /// Cancel the root context and wait for in-flight processing to finish.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

pub struct WorkflowManager {
    registrar: Arc<TaskRegistrar>,
    consignments: Arc<ConsignmentService>,
}

impl WorkflowManager {
    /// Wire the manager: builds the registrar and installs it as the
    /// consignment service's pre-commit callback.
    pub fn new(
        task_manager: Arc<TaskManager>,
        templates: Arc<dyn TemplateProvider>,
        consignments: Arc<ConsignmentService>,
    ) -> Arc<Self> {
        let registrar = Arc::new(TaskRegistrar::new(task_manager, templates));

        let callback_registrar = Arc::clone(&registrar);
        consignments.set_pre_commit_callback(Arc::new(move |nodes, global_context| {
            let registrar = Arc::clone(&callback_registrar);
            Box::pin(async move { registrar.register_nodes(&nodes, global_context).await })
        }));

        Arc::new(Self { registrar, consignments })
    }

    pub fn consignments(&self) -> &Arc<ConsignmentService> {
        &self.consignments
    }

    /// Spawn the single notification consumer.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut rx: task::notification::NotificationReceiver,
    ) -> ListenerHandle {
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let manager = Arc::clone(self);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        info!("workflow node update listener stopped");
                        break;
                    }
                    received = rx.recv() => match received {
                        Some(notification) => manager.handle_notification(notification).await,
                        None => {
                            info!("notification channel closed; listener exiting");
                            break;
                        }
                    }
                }
            }
        });

        ListenerHandle { token, handle }
    }

    /// Process one notification: map the plugin state, apply it through the
    /// consignment service, and activate any newly READY nodes.
    pub async fn handle_notification(&self, notification: Notification) {
        let Some(plugin_state) = notification.updated_state else {
            error!(task_id = %notification.task_id,
                   "received workflow node update without a state; dropping");
            return;
        };

        let request = UpdateNodeRequest {
            node_id: notification.task_id,
            state: plugin_state.into(),
            append_global_context: notification.append_global_context,
            extended_state: notification.extended_state,
        };

        let (new_ready, new_global_context) =
            match self.consignments.update_node_state_and_propagate(request).await {
                Ok(result) => result,
                Err(e) => {
                    error!(task_id = %notification.task_id, state = %plugin_state, error = %e,
                           "failed to handle workflow node update");
                    return;
                }
            };

        if !new_ready.is_empty() {
            let context = new_global_context.unwrap_or_default();
            if let Err(e) = self.registrar.register_nodes(&new_ready, context).await {
                // Not fatal: the nodes are persisted as READY and can be
                // re-activated on restart.
                error!(task_id = %notification.task_id, new_ready = new_ready.len(), error = %e,
                       "failed to register new ready nodes with task manager");
            }
        }
    }
}
