//! Store contracts — one trait per concern, implemented by both the
//! Postgres store and the in-memory store.
//!
//! `StoreTx` is the ambient transaction handle the state machine and the
//! consignment service operate through.  Repository methods never commit on
//! their own; the service layer owns every transaction boundary.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DbError;
use crate::model::{Consignment, GlobalContext, NodeTemplate, WorkflowNode, WorkflowTemplate};
use crate::model::ConsignmentFlow;

/// Entry point into persistence.
///
/// The non-transactional methods serve read projections and the task
/// layer's write-through key-value accessors; everything that must be
/// atomic goes through [`Store::begin`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction. Dropping the returned handle without calling
    /// `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError>;

    async fn get_consignment(&self, id: Uuid) -> Result<Consignment, DbError>;

    async fn get_consignments_by_trader(&self, trader_id: &str) -> Result<Vec<Consignment>, DbError>;

    async fn get_node(&self, id: Uuid) -> Result<WorkflowNode, DbError>;

    async fn get_nodes_by_consignment(&self, consignment_id: Uuid) -> Result<Vec<WorkflowNode>, DbError>;

    /// Batched variant used by list projections to avoid N+1 queries.
    async fn get_nodes_by_consignments(&self, consignment_ids: &[Uuid]) -> Result<Vec<WorkflowNode>, DbError>;

    /// Read the node's local key-value blob. `NotFound` if the row is absent.
    async fn get_local_state(&self, node_id: Uuid) -> Result<GlobalContext, DbError>;

    /// Replace the node's local key-value blob. A write against a row that
    /// does not exist yet (the node is still inside an uncommitted creation
    /// transaction) is a silent no-op.
    async fn update_local_state(&self, node_id: Uuid, state: GlobalContext) -> Result<(), DbError>;

    async fn get_plugin_state(&self, node_id: Uuid) -> Result<Option<String>, DbError>;

    /// Same no-op-on-missing-row semantics as [`Store::update_local_state`].
    async fn update_plugin_state(&self, node_id: Uuid, state: &str) -> Result<(), DbError>;
}

/// A live transaction over the store.
#[async_trait]
pub trait StoreTx: Send {
    async fn create_consignment(&mut self, consignment: &Consignment) -> Result<(), DbError>;

    async fn get_consignment(&mut self, id: Uuid) -> Result<Consignment, DbError>;

    async fn update_consignment(&mut self, consignment: &Consignment) -> Result<(), DbError>;

    async fn get_node(&mut self, id: Uuid) -> Result<WorkflowNode, DbError>;

    async fn get_nodes_by_ids(&mut self, ids: &[Uuid]) -> Result<Vec<WorkflowNode>, DbError>;

    async fn get_nodes_by_consignment(&mut self, consignment_id: Uuid) -> Result<Vec<WorkflowNode>, DbError>;

    /// Insert a batch of nodes and return them as stored.
    async fn create_nodes(&mut self, nodes: Vec<WorkflowNode>) -> Result<Vec<WorkflowNode>, DbError>;

    /// Per-row update of state, extended_state and depends_on.  Fields not
    /// owned by the workflow layer (local_state, plugin_state) are left
    /// untouched so concurrent plugin writes cannot be clobbered.
    async fn update_nodes(&mut self, nodes: &[WorkflowNode]) -> Result<(), DbError>;

    async fn count_incomplete_nodes(&mut self, consignment_id: Uuid) -> Result<i64, DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Read-only lookups over the workflow blueprints.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn workflow_template_by_hs_code_and_flow(
        &self,
        hs_code: &str,
        flow: ConsignmentFlow,
    ) -> Result<WorkflowTemplate, DbError>;

    async fn workflow_template_by_id(&self, id: Uuid) -> Result<WorkflowTemplate, DbError>;

    /// Returns the templates found; ids with no match are omitted.
    async fn node_templates_by_ids(&self, ids: &[Uuid]) -> Result<Vec<NodeTemplate>, DbError>;

    async fn node_template_by_id(&self, id: Uuid) -> Result<NodeTemplate, DbError>;
}
