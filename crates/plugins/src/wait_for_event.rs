//! WAIT_FOR_EVENT plugin — notifies an external service on start, then
//! waits for that service to call back with `action = "complete"`.
//!
//! The outbound notification is retried with exponential back-off: network
//! errors, 5xx and 429 are retryable; any other 4xx is fatal.  The task
//! only moves to IN_PROGRESS once the external service has acknowledged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::contract::{
    ExecutionRequest, ExecutionResponse, Plugin, PluginApi, PluginState, RenderInfo, TaskType,
};
use crate::PluginError;

pub const STATE_NOTIFIED_SERVICE: &str = "NOTIFIED_SERVICE";
pub const STATE_RECEIVED_CALLBACK: &str = "RECEIVED_CALLBACK";

/// The single action the external service may call back with.
pub const ACTION_COMPLETE: &str = "complete";

/// Configuration for a WAIT_FOR_EVENT task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitForEventConfig {
    /// URL of the external service to notify.
    #[serde(default)]
    pub external_service_url: String,
}

/// Tuning knobs for the outbound notification.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of times a retryable failure will be retried.
    pub max_retries: u32,
    /// Base delay for exponential back-off between attempts.
    pub initial_backoff: Duration,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WaitForEventPlugin {
    config: WaitForEventConfig,
    retry: RetryPolicy,
    client: reqwest::Client,
    api: Option<Arc<dyn PluginApi>>,
}

impl WaitForEventPlugin {
    pub fn new(config: &Value) -> Result<Self, PluginError> {
        let config: WaitForEventConfig = serde_json::from_value(config.clone())
            .map_err(|e| PluginError::Config(format!("wait-for-event config: {e}")))?;
        Ok(Self::with_retry_policy(config, RetryPolicy::default()))
    }

    pub fn with_retry_policy(config: WaitForEventConfig, retry: RetryPolicy) -> Self {
        Self {
            config,
            retry,
            client: reqwest::Client::new(),
            api: None,
        }
    }

    fn api(&self) -> Result<&Arc<dyn PluginApi>, PluginError> {
        self.api.as_ref().ok_or(PluginError::NotInitialized)
    }

    /// POST `{workflowId, taskId}` to the configured service, retrying
    /// retryable failures until the policy is exhausted.
    async fn notify_external_service(&self, workflow_id: Uuid, task_id: Uuid) -> Result<(), PluginError> {
        let body = json!({ "workflowId": workflow_id, "taskId": task_id });
        let url = &self.config.external_service_url;

        let mut backoff = self.retry.initial_backoff;
        let mut last_error = PluginError::Upstream("external service notification never attempted".into());

        for attempt in 0..=self.retry.max_retries {
            let sent = self
                .client
                .post(url)
                .timeout(self.retry.request_timeout)
                .json(&body)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        info!(%task_id, %workflow_id, url, %status, attempt = attempt + 1,
                              "notified external service");
                        return Ok(());
                    }
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(%task_id, %workflow_id, url, %status, attempt = attempt + 1,
                              max_retries = self.retry.max_retries,
                              "external service returned retryable error status");
                        last_error =
                            PluginError::Upstream(format!("external service returned status {status}"));
                    } else {
                        error!(%task_id, %workflow_id, url, %status,
                               "external service returned non-retryable error status");
                        return Err(PluginError::Upstream(format!(
                            "external service returned non-retryable status {status}"
                        )));
                    }
                }
                Err(err) => {
                    warn!(%task_id, %workflow_id, url, attempt = attempt + 1,
                          max_retries = self.retry.max_retries, error = %err,
                          "failed to send request to external service");
                    last_error = PluginError::Upstream(format!("request failed: {err}"));
                }
            }

            if attempt < self.retry.max_retries {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        error!(%task_id, %workflow_id, url, max_retries = self.retry.max_retries,
               "failed to notify external service after all retries");
        Err(last_error)
    }
}

#[async_trait]
impl Plugin for WaitForEventPlugin {
    fn init(&mut self, api: Arc<dyn PluginApi>) {
        self.api = Some(api);
    }

    async fn start(&self) -> Result<ExecutionResponse, PluginError> {
        let api = self.api()?;

        if self.config.external_service_url.is_empty() {
            return Err(PluginError::Config(
                "externalServiceUrl not configured in task config".into(),
            ));
        }

        self.notify_external_service(api.consignment_id(), api.task_id()).await?;
        api.set_plugin_state(STATE_NOTIFIED_SERVICE).await?;

        Ok(ExecutionResponse {
            new_state: Some(PluginState::InProgress),
            extended_state: Some(STATE_NOTIFIED_SERVICE.to_string()),
            append_global_context: None,
            message: "Notified external service, waiting for callback".into(),
            data: None,
        })
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, PluginError> {
        if request.action != ACTION_COMPLETE {
            return Err(PluginError::UnsupportedAction(request.action.clone()));
        }

        self.api()?.set_plugin_state(STATE_RECEIVED_CALLBACK).await?;

        Ok(ExecutionResponse {
            new_state: Some(PluginState::Completed),
            extended_state: Some(STATE_RECEIVED_CALLBACK.to_string()),
            append_global_context: None,
            message: "Task completed by external service".into(),
            data: None,
        })
    }

    async fn render_info(&self) -> Result<RenderInfo, PluginError> {
        let api = self.api()?;
        Ok(RenderInfo {
            task_type: TaskType::WaitForEvent,
            state: api.task_state().await,
            plugin_state: api.plugin_state().await,
            content: None,
        })
    }
}
