//! Form-like plugin backing TRADER_FORM, OGA_FORM and DOCUMENT_SUBMISSION
//! tasks.
//!
//! `start` moves the task to IN_PROGRESS and surfaces the form schema;
//! `execute` understands FETCH_FORM (schema retrieval, no transition) and
//! SUBMIT_FORM (persist the submitted data in the local store, complete).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contract::{
    ExecutionRequest, ExecutionResponse, Plugin, PluginApi, PluginState, RenderInfo, TaskType,
};
use crate::PluginError;

pub const ACTION_FETCH_FORM: &str = "FETCH_FORM";
pub const ACTION_SUBMIT_FORM: &str = "SUBMIT_FORM";

/// Local-store key the submitted form data is persisted under.
pub const SUBMITTED_FORM_DATA_KEY: &str = "submitted_form_data";

/// JSON Forms configuration carried in the node template's config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormConfig {
    /// Unique identifier for the form.
    pub form_id: String,
    /// Display title of the form.
    pub title: String,
    /// JSON Schema defining the form structure and validation.
    pub json_schema: Value,
    /// UI Schema for rendering hints (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<Value>,
    /// Default/pre-filled form data (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<Value>,
}

pub struct FormPlugin {
    task_type: TaskType,
    config: FormConfig,
    api: Option<Arc<dyn PluginApi>>,
}

impl FormPlugin {
    pub fn new(task_type: TaskType, config: &Value) -> Result<Self, PluginError> {
        let config: FormConfig = serde_json::from_value(config.clone())
            .map_err(|e| PluginError::Config(format!("form config: {e}")))?;
        Ok(Self {
            task_type,
            config,
            api: None,
        })
    }

    fn api(&self) -> Result<&Arc<dyn PluginApi>, PluginError> {
        self.api.as_ref().ok_or(PluginError::NotInitialized)
    }

    fn schema_payload(&self) -> Value {
        json!({
            "formId": self.config.form_id,
            "title": self.config.title,
            "jsonSchema": self.config.json_schema,
            "uiSchema": self.config.ui_schema,
            "formData": self.config.form_data,
        })
    }

    async fn submit(&self, payload: Option<&Value>) -> Result<ExecutionResponse, PluginError> {
        let form_data = match payload {
            Some(data) if !data.is_null() => data.clone(),
            _ => return Err(PluginError::Config("form data is required for submission".into())),
        };

        // TODO: validate the submitted data against the JSON schema.
        self.api()?
            .write_local(SUBMITTED_FORM_DATA_KEY, form_data)
            .await?;

        Ok(ExecutionResponse {
            new_state: Some(PluginState::Completed),
            extended_state: None,
            append_global_context: None,
            message: "Form submitted successfully".into(),
            data: Some(json!({ "formId": self.config.form_id })),
        })
    }
}

#[async_trait]
impl Plugin for FormPlugin {
    fn init(&mut self, api: Arc<dyn PluginApi>) {
        self.api = Some(api);
    }

    async fn start(&self) -> Result<ExecutionResponse, PluginError> {
        Ok(ExecutionResponse {
            new_state: Some(PluginState::InProgress),
            extended_state: None,
            append_global_context: None,
            message: "Form is awaiting submission".into(),
            data: Some(self.schema_payload()),
        })
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, PluginError> {
        match request.action.as_str() {
            ACTION_FETCH_FORM => {
                let mut response = ExecutionResponse::message_only("Form schema retrieved successfully");
                response.data = Some(self.schema_payload());
                Ok(response)
            }
            ACTION_SUBMIT_FORM => self.submit(request.payload.as_ref()).await,
            other => Err(PluginError::UnsupportedAction(other.to_string())),
        }
    }

    async fn render_info(&self) -> Result<RenderInfo, PluginError> {
        let api = self.api()?;
        Ok(RenderInfo {
            task_type: self.task_type,
            state: api.task_state().await,
            plugin_state: api.plugin_state().await,
            content: Some(self.schema_payload()),
        })
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApi;
    use db::model::NodeState;
    use serde_json::json;

    fn form_plugin() -> (FormPlugin, Arc<TestApi>) {
        let config = json!({
            "formId": "import-declaration",
            "title": "Import Declaration",
            "jsonSchema": { "type": "object", "properties": { "weight": { "type": "number" } } },
        });
        let mut plugin = FormPlugin::new(TaskType::TraderForm, &config).expect("valid config");
        let api = Arc::new(TestApi::new(NodeState::Ready));
        plugin.init(api.clone());
        (plugin, api)
    }

    #[tokio::test]
    async fn start_requests_in_progress_and_returns_schema() {
        let (plugin, _api) = form_plugin();
        let response = plugin.start().await.unwrap();

        assert_eq!(response.new_state, Some(PluginState::InProgress));
        let data = response.data.unwrap();
        assert_eq!(data["formId"], "import-declaration");
        assert_eq!(data["title"], "Import Declaration");
    }

    #[tokio::test]
    async fn fetch_form_returns_schema_without_transition() {
        let (plugin, _api) = form_plugin();
        let response = plugin
            .execute(&ExecutionRequest { action: ACTION_FETCH_FORM.into(), payload: None })
            .await
            .unwrap();

        assert!(response.new_state.is_none());
        assert_eq!(response.data.unwrap()["formId"], "import-declaration");
    }

    #[tokio::test]
    async fn submit_persists_data_and_completes() {
        let (plugin, api) = form_plugin();
        let response = plugin
            .execute(&ExecutionRequest {
                action: ACTION_SUBMIT_FORM.into(),
                payload: Some(json!({ "weight": 12.5 })),
            })
            .await
            .unwrap();

        assert_eq!(response.new_state, Some(PluginState::Completed));
        let stored = api.local_value(SUBMITTED_FORM_DATA_KEY).unwrap();
        assert_eq!(stored["weight"], 12.5);
    }

    #[tokio::test]
    async fn submit_without_data_fails() {
        let (plugin, api) = form_plugin();
        let result = plugin
            .execute(&ExecutionRequest { action: ACTION_SUBMIT_FORM.into(), payload: None })
            .await;

        assert!(matches!(result, Err(PluginError::Config(_))));
        assert!(api.local_value(SUBMITTED_FORM_DATA_KEY).is_none());
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let (plugin, _api) = form_plugin();
        let result = plugin
            .execute(&ExecutionRequest { action: "APPROVE".into(), payload: None })
            .await;

        assert!(matches!(result, Err(PluginError::UnsupportedAction(a)) if a == "APPROVE"));
    }

    #[test]
    fn config_must_parse() {
        let result = FormPlugin::new(TaskType::TraderForm, &json!({ "title": 42 }));
        assert!(matches!(result, Err(PluginError::Config(_))));
    }
}
