//! The `Plugin` trait and the container API surface it programs against.
//!
//! Defined here (in the plugins crate) so the task layer, the workflow
//! engine and individual plugin implementations can all import the shared
//! types without a circular dependency.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use db::model::{GlobalContext, NodeState};

use crate::PluginError;

// ---------------------------------------------------------------------------
// Task types
// ---------------------------------------------------------------------------

/// The closed set of node type tags a template may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    TraderForm,
    OgaForm,
    WaitForEvent,
    Payment,
    DocumentSubmission,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TraderForm => write!(f, "TRADER_FORM"),
            Self::OgaForm => write!(f, "OGA_FORM"),
            Self::WaitForEvent => write!(f, "WAIT_FOR_EVENT"),
            Self::Payment => write!(f, "PAYMENT"),
            Self::DocumentSubmission => write!(f, "DOCUMENT_SUBMISSION"),
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = PluginError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TRADER_FORM" => Ok(Self::TraderForm),
            "OGA_FORM" => Ok(Self::OgaForm),
            "WAIT_FOR_EVENT" => Ok(Self::WaitForEvent),
            "PAYMENT" => Ok(Self::Payment),
            "DOCUMENT_SUBMISSION" => Ok(Self::DocumentSubmission),
            other => Err(PluginError::UnknownType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Plugin states
// ---------------------------------------------------------------------------

/// The only workflow-visible states a plugin may emit.
///
/// LOCKED and READY are reserved for the state machine; a plugin response
/// with no state means "no transition intended".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    InProgress,
    Completed,
    Failed,
}

impl From<PluginState> for NodeState {
    fn from(state: PluginState) -> Self {
        match state {
            PluginState::InProgress => NodeState::InProgress,
            PluginState::Completed => NodeState::Completed,
            PluginState::Failed => NodeState::Failed,
        }
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// An external actor's interaction with a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Plugin-defined action tag (e.g. `SUBMIT_FORM`, `complete`).
    pub action: String,
    /// Action payload, interpreted by the plugin.
    pub payload: Option<Value>,
}

/// The outcome of `start` or `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    /// Requested workflow transition; `None` means no transition intended.
    pub new_state: Option<PluginState>,
    /// Plugin-defined sub-state, carried onto the node for diagnostics.
    pub extended_state: Option<String>,
    /// Key-value pairs to merge into the consignment's global context.
    pub append_global_context: Option<GlobalContext>,
    pub message: String,
    /// Caller-facing payload (form schema, receipts, …).
    pub data: Option<Value>,
}

impl ExecutionResponse {
    /// A response that requests no transition and carries no side channel.
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            new_state: None,
            extended_state: None,
            append_global_context: None,
            message: message.into(),
            data: None,
        }
    }

    /// True when the response carries something the workflow manager must
    /// be told about.
    pub fn needs_notification(&self) -> bool {
        self.new_state.is_some()
            || self.extended_state.is_some()
            || self.append_global_context.is_some()
    }
}

/// Payload the UI needs to render a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderInfo {
    pub task_type: TaskType,
    pub state: NodeState,
    pub plugin_state: Option<String>,
    pub content: Option<Value>,
}

// ---------------------------------------------------------------------------
// Container API
// ---------------------------------------------------------------------------

/// The plugin's only window onto the outside world, implemented by the
/// task container.
///
/// `set_plugin_state` and `write_local` are write-through: the cached value
/// and the node row are updated together.  `read_global` is an advisory
/// point-in-time read of the consignment's shared context; authoritative
/// writes travel via the notification's `append_global_context` field.
#[async_trait]
pub trait PluginApi: Send + Sync {
    fn task_id(&self) -> Uuid;

    fn consignment_id(&self) -> Uuid;

    async fn task_state(&self) -> NodeState;

    async fn set_task_state(&self, state: NodeState);

    async fn plugin_state(&self) -> Option<String>;

    async fn set_plugin_state(&self, state: &str) -> Result<(), PluginError>;

    async fn read_local(&self, key: &str) -> Option<Value>;

    async fn write_local(&self, key: &str, value: Value) -> Result<(), PluginError>;

    async fn read_global(&self, key: &str) -> Option<Value>;
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// The type-specific executable attached to a workflow node.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Receive the container API. Non-blocking; no I/O.
    fn init(&mut self, api: Arc<dyn PluginApi>);

    /// Called once when the node becomes runnable under the task manager.
    async fn start(&self) -> Result<ExecutionResponse, PluginError>;

    /// Called when an external actor interacts with the node.
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, PluginError>;

    /// Read-only payload for rendering the node.
    async fn render_info(&self) -> Result<RenderInfo, PluginError>;
}
