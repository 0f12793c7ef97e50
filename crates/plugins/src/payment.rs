//! PAYMENT plugin.
//!
//! Minimal placeholder: the payment gateway integration is pending, so the
//! task is parked in IN_PROGRESS until a real gateway drives it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::contract::{
    ExecutionRequest, ExecutionResponse, Plugin, PluginApi, PluginState, RenderInfo, TaskType,
};
use crate::PluginError;

#[derive(Default)]
pub struct PaymentPlugin {
    api: Option<Arc<dyn PluginApi>>,
}

impl PaymentPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Plugin for PaymentPlugin {
    fn init(&mut self, api: Arc<dyn PluginApi>) {
        self.api = Some(api);
    }

    async fn start(&self) -> Result<ExecutionResponse, PluginError> {
        Ok(ExecutionResponse {
            new_state: Some(PluginState::InProgress),
            extended_state: None,
            append_global_context: None,
            message: "Payment initiated, awaiting gateway confirmation".into(),
            data: None,
        })
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, PluginError> {
        Err(PluginError::UnsupportedAction(request.action.clone()))
    }

    async fn render_info(&self) -> Result<RenderInfo, PluginError> {
        let api = self.api.as_ref().ok_or(PluginError::NotInitialized)?;
        Ok(RenderInfo {
            task_type: TaskType::Payment,
            state: api.task_state().await,
            plugin_state: api.plugin_state().await,
            content: None,
        })
    }
}
