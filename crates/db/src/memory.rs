//! In-memory implementation of the store contracts.
//!
//! Backs every unit and integration test in the workspace so no Postgres
//! instance is required.  A transaction takes a snapshot of the shared
//! state at `begin` and stages its writes locally; `commit` applies the
//! staged entities back, `rollback` (or drop) discards them.  Reads inside
//! a transaction therefore see a stable snapshot plus the transaction's own
//! writes, which is the repeatable-read behavior the services rely on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::DbError;
use crate::model::{
    Consignment, ConsignmentFlow, GlobalContext, NodeState, NodeTemplate, WorkflowNode,
    WorkflowTemplate,
};
use crate::store::{Store, StoreTx, TemplateProvider};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    consignments: HashMap<Uuid, Consignment>,
    nodes: HashMap<Uuid, WorkflowNode>,
    workflow_templates: HashMap<Uuid, WorkflowTemplate>,
    node_templates: HashMap<Uuid, NodeTemplate>,
    template_maps: HashMap<(String, ConsignmentFlow), Uuid>,
    /// Id order of every committed `update_nodes` batch, for test assertions.
    update_batches: Vec<Vec<Uuid>>,
}

/// Shared in-memory store. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- seeding helpers for tests and fixtures --

    pub fn insert_workflow_template(&self, template: WorkflowTemplate) {
        self.lock().workflow_templates.insert(template.id, template);
    }

    pub fn insert_node_template(&self, template: NodeTemplate) {
        self.lock().node_templates.insert(template.id, template);
    }

    pub fn map_hs_code(&self, hs_code: &str, flow: ConsignmentFlow, workflow_template_id: Uuid) {
        self.lock()
            .template_maps
            .insert((hs_code.to_string(), flow), workflow_template_id);
    }

    // -- inspection helpers for tests --

    pub fn consignment_count(&self) -> usize {
        self.lock().consignments.len()
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Id order of every `update_nodes` batch committed so far.
    pub fn update_batches(&self) -> Vec<Vec<Uuid>> {
        self.lock().update_batches.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError> {
        let snapshot = self.lock().clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.state),
            snapshot,
            staged_consignments: HashMap::new(),
            staged_nodes: HashMap::new(),
            update_batches: Vec::new(),
        }))
    }

    async fn get_consignment(&self, id: Uuid) -> Result<Consignment, DbError> {
        self.lock().consignments.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn get_consignments_by_trader(&self, trader_id: &str) -> Result<Vec<Consignment>, DbError> {
        let mut found: Vec<Consignment> = self
            .lock()
            .consignments
            .values()
            .filter(|c| c.trader_id == trader_id)
            .cloned()
            .collect();
        found.sort_by_key(|c| c.id);
        Ok(found)
    }

    async fn get_node(&self, id: Uuid) -> Result<WorkflowNode, DbError> {
        self.lock().nodes.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn get_nodes_by_consignment(&self, consignment_id: Uuid) -> Result<Vec<WorkflowNode>, DbError> {
        let mut found: Vec<WorkflowNode> = self
            .lock()
            .nodes
            .values()
            .filter(|n| n.consignment_id == consignment_id)
            .cloned()
            .collect();
        found.sort_by_key(|n| n.id);
        Ok(found)
    }

    async fn get_nodes_by_consignments(&self, consignment_ids: &[Uuid]) -> Result<Vec<WorkflowNode>, DbError> {
        let mut found: Vec<WorkflowNode> = self
            .lock()
            .nodes
            .values()
            .filter(|n| consignment_ids.contains(&n.consignment_id))
            .cloned()
            .collect();
        found.sort_by_key(|n| n.id);
        Ok(found)
    }

    async fn get_local_state(&self, node_id: Uuid) -> Result<GlobalContext, DbError> {
        self.lock()
            .nodes
            .get(&node_id)
            .map(|n| n.local_state.clone())
            .ok_or(DbError::NotFound)
    }

    async fn update_local_state(&self, node_id: Uuid, state: GlobalContext) -> Result<(), DbError> {
        if let Some(node) = self.lock().nodes.get_mut(&node_id) {
            node.local_state = state;
            node.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_plugin_state(&self, node_id: Uuid) -> Result<Option<String>, DbError> {
        self.lock()
            .nodes
            .get(&node_id)
            .map(|n| n.plugin_state.clone())
            .ok_or(DbError::NotFound)
    }

    async fn update_plugin_state(&self, node_id: Uuid, state: &str) -> Result<(), DbError> {
        if let Some(node) = self.lock().nodes.get_mut(&node_id) {
            node.plugin_state = Some(state.to_string());
            node.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateProvider for MemoryStore {
    async fn workflow_template_by_hs_code_and_flow(
        &self,
        hs_code: &str,
        flow: ConsignmentFlow,
    ) -> Result<WorkflowTemplate, DbError> {
        let state = self.lock();
        let template_id = state
            .template_maps
            .get(&(hs_code.to_string(), flow))
            .ok_or(DbError::NotFound)?;
        state
            .workflow_templates
            .get(template_id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn workflow_template_by_id(&self, id: Uuid) -> Result<WorkflowTemplate, DbError> {
        self.lock().workflow_templates.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn node_templates_by_ids(&self, ids: &[Uuid]) -> Result<Vec<NodeTemplate>, DbError> {
        let state = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.node_templates.get(id).cloned())
            .collect())
    }

    async fn node_template_by_id(&self, id: Uuid) -> Result<NodeTemplate, DbError> {
        self.lock().node_templates.get(&id).cloned().ok_or(DbError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    snapshot: MemoryState,
    staged_consignments: HashMap<Uuid, Consignment>,
    staged_nodes: HashMap<Uuid, WorkflowNode>,
    update_batches: Vec<Vec<Uuid>>,
}

impl MemoryTx {
    fn node_view(&self, id: Uuid) -> Option<&WorkflowNode> {
        self.staged_nodes.get(&id).or_else(|| self.snapshot.nodes.get(&id))
    }

    fn nodes_by_consignment_view(&self, consignment_id: Uuid) -> Vec<WorkflowNode> {
        let mut merged: HashMap<Uuid, WorkflowNode> = self
            .snapshot
            .nodes
            .values()
            .filter(|n| n.consignment_id == consignment_id)
            .map(|n| (n.id, n.clone()))
            .collect();
        for node in self.staged_nodes.values() {
            if node.consignment_id == consignment_id {
                merged.insert(node.id, node.clone());
            }
        }
        let mut nodes: Vec<WorkflowNode> = merged.into_values().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn create_consignment(&mut self, consignment: &Consignment) -> Result<(), DbError> {
        self.staged_consignments.insert(consignment.id, consignment.clone());
        Ok(())
    }

    async fn get_consignment(&mut self, id: Uuid) -> Result<Consignment, DbError> {
        self.staged_consignments
            .get(&id)
            .or_else(|| self.snapshot.consignments.get(&id))
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn update_consignment(&mut self, consignment: &Consignment) -> Result<(), DbError> {
        if !self.staged_consignments.contains_key(&consignment.id)
            && !self.snapshot.consignments.contains_key(&consignment.id)
        {
            return Err(DbError::NotFound);
        }
        let mut updated = consignment.clone();
        updated.updated_at = Utc::now();
        self.staged_consignments.insert(updated.id, updated);
        Ok(())
    }

    async fn get_node(&mut self, id: Uuid) -> Result<WorkflowNode, DbError> {
        self.node_view(id).cloned().ok_or(DbError::NotFound)
    }

    async fn get_nodes_by_ids(&mut self, ids: &[Uuid]) -> Result<Vec<WorkflowNode>, DbError> {
        Ok(ids.iter().filter_map(|id| self.node_view(*id).cloned()).collect())
    }

    async fn get_nodes_by_consignment(&mut self, consignment_id: Uuid) -> Result<Vec<WorkflowNode>, DbError> {
        Ok(self.nodes_by_consignment_view(consignment_id))
    }

    async fn create_nodes(&mut self, nodes: Vec<WorkflowNode>) -> Result<Vec<WorkflowNode>, DbError> {
        for node in &nodes {
            self.staged_nodes.insert(node.id, node.clone());
        }
        Ok(nodes)
    }

    async fn update_nodes(&mut self, nodes: &[WorkflowNode]) -> Result<(), DbError> {
        self.update_batches.push(nodes.iter().map(|n| n.id).collect());
        for node in nodes {
            let mut current = self.node_view(node.id).cloned().ok_or(DbError::NotFound)?;
            current.state = node.state;
            current.extended_state = node.extended_state.clone();
            current.depends_on = node.depends_on.clone();
            current.updated_at = Utc::now();
            self.staged_nodes.insert(current.id, current);
        }
        Ok(())
    }

    async fn count_incomplete_nodes(&mut self, consignment_id: Uuid) -> Result<i64, DbError> {
        Ok(self
            .nodes_by_consignment_view(consignment_id)
            .iter()
            .filter(|n| n.state != NodeState::Completed)
            .count() as i64)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        let MemoryTx { shared, staged_consignments, staged_nodes, update_batches, snapshot: _ } =
            *self;
        let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, consignment) in staged_consignments {
            state.consignments.insert(id, consignment);
        }
        for (id, mut node) in staged_nodes {
            // Keep live KV fields written outside the transaction.
            if let Some(live) = state.nodes.get(&id) {
                node.local_state = live.local_state.clone();
                node.plugin_state = live.plugin_state.clone();
            }
            state.nodes.insert(id, node);
        }
        state.update_batches.extend(update_batches);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        Ok(())
    }
}
