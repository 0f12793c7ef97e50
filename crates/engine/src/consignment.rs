//! Consignment service — transactional creation and state propagation.
//!
//! `initialize_consignment` is the one operation that must be atomic end to
//! end: the consignment row, all its workflow nodes, and the registration
//! of the READY ones with the task manager either all happen or none do.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use db::model::{
    Consignment, ConsignmentFlow, ConsignmentState, GlobalContext, Item, NodeState, WorkflowNode,
};
use db::{Store, StoreTx, TemplateProvider};

use crate::error::EngineError;
use crate::state_machine;

/// Hook run inside the creation transaction, just before commit.  Receives
/// the newly READY nodes and the consignment's global context; an error
/// rolls the whole creation back.
pub type PreCommitCallback = Arc<
    dyn Fn(Vec<WorkflowNode>, GlobalContext) -> BoxFuture<'static, Result<(), EngineError>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone, Deserialize)]
pub struct ItemRequest {
    pub hs_code: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateConsignmentRequest {
    pub trader_id: String,
    pub flow: ConsignmentFlow,
    pub items: Vec<ItemRequest>,
    #[serde(default)]
    pub global_context: GlobalContext,
}

/// A node-state update request, typically derived from a notification.
#[derive(Debug, Clone)]
pub struct UpdateNodeRequest {
    pub node_id: Uuid,
    pub state: NodeState,
    pub append_global_context: Option<GlobalContext>,
    pub extended_state: Option<String>,
}

/// A consignment with its child nodes, as returned by the read operations.
#[derive(Debug, Clone, Serialize)]
pub struct ConsignmentDetails {
    #[serde(flatten)]
    pub consignment: Consignment,
    pub workflow_nodes: Vec<WorkflowNode>,
}

pub struct ConsignmentService {
    store: Arc<dyn Store>,
    templates: Arc<dyn TemplateProvider>,
    pre_commit: Mutex<Option<PreCommitCallback>>,
}

impl ConsignmentService {
    pub fn new(store: Arc<dyn Store>, templates: Arc<dyn TemplateProvider>) -> Self {
        Self {
            store,
            templates,
            pre_commit: Mutex::new(None),
        }
    }

    /// Install the pre-commit validation hook (task-manager registration).
    pub fn set_pre_commit_callback(&self, callback: PreCommitCallback) {
        *self.pre_commit.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn pre_commit_callback(&self) -> Option<PreCommitCallback> {
        self.pre_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically materialize a consignment and its workflow nodes.
    ///
    /// Either the caller gets a consignment whose READY nodes are already
    /// runnable by the task manager, or nothing exists.
    #[instrument(skip(self, request), fields(trader_id = %request.trader_id))]
    pub async fn initialize_consignment(
        &self,
        request: CreateConsignmentRequest,
    ) -> Result<ConsignmentDetails, EngineError> {
        if request.items.is_empty() {
            return Err(EngineError::Validation(
                "consignment must have at least one item".into(),
            ));
        }
        if request.trader_id.trim().is_empty() {
            return Err(EngineError::Validation("trader id cannot be empty".into()));
        }

        // Resolve the workflow template for every item up front; an
        // unmapped HS code fails the creation before anything is written.
        let mut workflow_templates = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let template = self
                .templates
                .workflow_template_by_hs_code_and_flow(&item.hs_code, request.flow)
                .await?;
            workflow_templates.push(template);
        }

        let items: Vec<Item> = request
            .items
            .into_iter()
            .map(|i| Item { hs_code: i.hs_code, metadata: i.metadata })
            .collect();
        let consignment = Consignment::new(
            request.trader_id,
            request.flow,
            items,
            request.global_context,
        );

        // Union of node templates across all items, de-duplicated.
        let mut seen = std::collections::HashSet::new();
        let mut node_template_ids = Vec::new();
        for template in &workflow_templates {
            for id in &template.node_templates {
                if seen.insert(*id) {
                    node_template_ids.push(*id);
                }
            }
        }
        let node_templates = self.templates.node_templates_by_ids(&node_template_ids).await?;

        let mut tx = self.store.begin().await?;
        tx.create_consignment(&consignment).await?;

        let (nodes, new_ready) = state_machine::initialize_nodes_from_templates(
            tx.as_mut(),
            consignment.id,
            &node_templates,
        )
        .await?;

        if let Some(callback) = self.pre_commit_callback() {
            if !new_ready.is_empty() {
                if let Err(e) = callback(new_ready.clone(), consignment.global_context.clone()).await
                {
                    tx.rollback().await?;
                    return Err(e);
                }
            }
        }

        tx.commit().await?;

        Ok(ConsignmentDetails {
            consignment,
            workflow_nodes: nodes,
        })
    }

    /// Apply a notification-driven state update and propagate it through
    /// the DAG.  Returns the newly READY nodes and, when the global context
    /// was appended to, the merged context.
    #[instrument(skip(self, request), fields(node_id = %request.node_id, state = %request.state))]
    pub async fn update_node_state_and_propagate(
        &self,
        request: UpdateNodeRequest,
    ) -> Result<(Vec<WorkflowNode>, Option<GlobalContext>), EngineError> {
        let mut tx = self.store.begin().await?;
        let mut node = tx.get_node(request.node_id).await?;

        let mut new_ready = Vec::new();
        match request.state {
            NodeState::Failed => {
                if node.state != NodeState::Failed {
                    state_machine::transition_to_failed(
                        tx.as_mut(),
                        &mut node,
                        request.extended_state.clone(),
                    )
                    .await?;
                }
            }
            NodeState::Completed => {
                if node.state != NodeState::Completed {
                    let outcome = state_machine::transition_to_completed(
                        tx.as_mut(),
                        &mut node,
                        request.extended_state.clone(),
                    )
                    .await?;
                    new_ready = outcome.new_ready;

                    if outcome.all_completed {
                        self.mark_consignment_finished(tx.as_mut(), node.consignment_id).await?;
                    }
                }
            }
            // Only terminal-side transitions are driven by notifications;
            // READY and IN_PROGRESS arrive through node initialization and
            // the first plugin response.
            other => {
                debug!(state = %other, "ignoring non-terminal state update");
            }
        }

        let mut new_context = None;
        if let Some(append) = &request.append_global_context {
            if !append.is_empty() {
                new_context = Some(
                    self.append_global_context(tx.as_mut(), node.consignment_id, append).await?,
                );
            }
        }

        tx.commit().await?;
        Ok((new_ready, new_context))
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<ConsignmentDetails, EngineError> {
        let consignment = self.store.get_consignment(id).await?;
        let workflow_nodes = self.store.get_nodes_by_consignment(id).await?;
        Ok(ConsignmentDetails { consignment, workflow_nodes })
    }

    pub async fn get_by_trader_id(&self, trader_id: &str) -> Result<Vec<ConsignmentDetails>, EngineError> {
        let consignments = self.store.get_consignments_by_trader(trader_id).await?;
        if consignments.is_empty() {
            return Ok(Vec::new());
        }

        // One batched query for all child nodes instead of one per
        // consignment.
        let ids: Vec<Uuid> = consignments.iter().map(|c| c.id).collect();
        let all_nodes = self.store.get_nodes_by_consignments(&ids).await?;

        let mut nodes_by_consignment: std::collections::HashMap<Uuid, Vec<WorkflowNode>> =
            std::collections::HashMap::new();
        for node in all_nodes {
            nodes_by_consignment.entry(node.consignment_id).or_default().push(node);
        }

        Ok(consignments
            .into_iter()
            .map(|consignment| {
                let workflow_nodes =
                    nodes_by_consignment.remove(&consignment.id).unwrap_or_default();
                ConsignmentDetails { consignment, workflow_nodes }
            })
            .collect())
    }

    async fn mark_consignment_finished(
        &self,
        tx: &mut dyn StoreTx,
        consignment_id: Uuid,
    ) -> Result<(), EngineError> {
        let mut consignment = tx.get_consignment(consignment_id).await?;
        consignment.state = ConsignmentState::Finished;
        tx.update_consignment(&consignment).await?;
        Ok(())
    }

    async fn append_global_context(
        &self,
        tx: &mut dyn StoreTx,
        consignment_id: Uuid,
        append: &GlobalContext,
    ) -> Result<GlobalContext, EngineError> {
        let mut consignment = tx.get_consignment(consignment_id).await?;
        for (key, value) in append {
            // TODO: key-collision policy; last write wins for now.
            consignment.global_context.insert(key.clone(), value.clone());
        }
        tx.update_consignment(&consignment).await?;
        Ok(consignment.global_context)
    }
}
