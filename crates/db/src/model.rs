//! Core domain records for the consignment workflow system.
//!
//! These types are the source of truth for what a consignment and its
//! workflow nodes look like in memory.  Identifiers and timestamps are
//! assigned in the constructors, never inside the persistence layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The per-consignment key-value bag shared by all of its nodes.
pub type GlobalContext = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Direction of a consignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsignmentFlow {
    Import,
    Export,
}

impl std::fmt::Display for ConsignmentFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "IMPORT"),
            Self::Export => write!(f, "EXPORT"),
        }
    }
}

impl std::str::FromStr for ConsignmentFlow {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMPORT" => Ok(Self::Import),
            "EXPORT" => Ok(Self::Export),
            other => Err(format!("unknown consignment flow: {other}")),
        }
    }
}

/// Lifecycle state of a consignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsignmentState {
    InProgress,
    Finished,
}

impl std::fmt::Display for ConsignmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Finished => write!(f, "FINISHED"),
        }
    }
}

impl std::str::FromStr for ConsignmentState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(Self::InProgress),
            "FINISHED" => Ok(Self::Finished),
            other => Err(format!("unknown consignment state: {other}")),
        }
    }
}

/// Lifecycle state of a workflow node.
///
/// `Locked` is the initial state; `Completed` and `Failed` are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Cannot be activated — at least one dependency is incomplete.
    Locked,
    /// All dependencies completed; runnable by the task manager.
    Ready,
    /// Work has started; awaiting completion or failure.
    InProgress,
    /// Terminal success.
    Completed,
    /// Terminal failure. Does not propagate to dependents.
    Failed,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked => write!(f, "LOCKED"),
            Self::Ready => write!(f, "READY"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for NodeState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCKED" => Ok(Self::Locked),
            "READY" => Ok(Self::Ready),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown node state: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Consignment
// ---------------------------------------------------------------------------

/// An individual item within a consignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Harmonized System code of the traded goods.
    pub hs_code: String,
    /// Free-form item information (description, quantity, value, …).
    pub metadata: Value,
}

/// A business transaction instance; the root entity of the workflow system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consignment {
    pub id: Uuid,
    pub trader_id: String,
    pub flow: ConsignmentFlow,
    pub items: Vec<Item>,
    pub state: ConsignmentState,
    /// Shared read/write space across all nodes of this consignment.
    pub global_context: GlobalContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Consignment {
    pub fn new(
        trader_id: impl Into<String>,
        flow: ConsignmentFlow,
        items: Vec<Item>,
        global_context: GlobalContext,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trader_id: trader_id.into(),
            flow,
            items,
            state: ConsignmentState::InProgress,
            global_context,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow node
// ---------------------------------------------------------------------------

/// A runtime instance of a node template, owned by one consignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: Uuid,
    pub consignment_id: Uuid,
    /// The node template this node was materialized from.
    pub template_id: Uuid,
    pub state: NodeState,
    /// Sibling node ids that must be COMPLETED before this node is READY.
    pub depends_on: Vec<Uuid>,
    /// Plugin-defined sub-state carried for diagnostics.
    pub extended_state: Option<String>,
    /// Per-node key-value store, persisted as one JSON blob.
    pub local_state: GlobalContext,
    /// Plugin-managed business state cached on the row.
    pub plugin_state: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowNode {
    /// Create a fresh LOCKED node for the given consignment and template.
    pub fn from_template(consignment_id: Uuid, template_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            consignment_id,
            template_id,
            state: NodeState::Locked,
            depends_on: Vec::new(),
            extended_state: None,
            local_state: GlobalContext::new(),
            plugin_state: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Templates (read-only at runtime)
// ---------------------------------------------------------------------------

/// Blueprint for a single workflow node.
///
/// `task_type` is kept as the raw wire tag; the plugin factory parses it so
/// that an unrecognized tag fails at task registration, inside the creation
/// transaction, instead of at template decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub id: Uuid,
    pub task_type: String,
    /// Plugin-specific configuration blob.
    pub config: Value,
    /// Template-level dependencies, resolved to node ids at creation.
    pub depends_on: Vec<Uuid>,
}

/// Blueprint for a whole workflow: the node templates whose induced
/// dependency graph forms the DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub flow: ConsignmentFlow,
    pub node_templates: Vec<Uuid>,
}
