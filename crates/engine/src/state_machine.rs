//! Workflow node state machine.
//!
//! Pure transition logic over nodes already loaded in memory; the only I/O
//! goes through the ambient `StoreTx` supplied by the caller.  Transitions
//! to the current state are idempotent no-ops, which absorbs at-least-once
//! delivery on the notification channel.
//!
//! State graph (initial LOCKED; sinks COMPLETED, FAILED):
//!
//! LOCKED → READY                 all dependencies COMPLETED
//! READY → IN_PROGRESS            plugin reports start
//! READY | IN_PROGRESS → COMPLETED
//! READY | IN_PROGRESS → FAILED

use std::collections::{HashMap, HashSet};

use tracing::warn;
use uuid::Uuid;

use db::model::{NodeState, NodeTemplate, WorkflowNode};
use db::StoreTx;

use crate::error::EngineError;

/// The result of a completion transition.
#[derive(Debug, Default)]
pub struct TransitionOutcome {
    /// All nodes written during the transition.
    pub updated: Vec<WorkflowNode>,
    /// Nodes that moved from LOCKED to READY.
    pub new_ready: Vec<WorkflowNode>,
    /// Whether every node of the consignment is now COMPLETED.
    pub all_completed: bool,
}

/// Transition a node to COMPLETED and unlock any dependents whose
/// dependencies are now fully satisfied.
///
/// The updated set is persisted in one batch, sorted by node id ascending,
/// so concurrent completions on the same consignment acquire row locks in
/// a consistent order.
pub async fn transition_to_completed(
    tx: &mut dyn StoreTx,
    node: &mut WorkflowNode,
    extended_state: Option<String>,
) -> Result<TransitionOutcome, EngineError> {
    if node.state == NodeState::Completed {
        // Already completed; nothing to do.
        return Ok(TransitionOutcome::default());
    }
    guard(node, NodeState::Completed)?;

    node.state = NodeState::Completed;
    node.extended_state = extended_state;

    let siblings = tx.get_nodes_by_consignment(node.consignment_id).await?;

    let (new_ready, unlocked) = unlock_dependent_nodes(&siblings, node.id);

    let mut to_update = Vec::with_capacity(1 + unlocked.len());
    to_update.push(node.clone());
    to_update.extend(unlocked);
    to_update.sort_by(|a, b| a.id.cmp(&b.id));

    tx.update_nodes(&to_update).await?;

    let all_completed = all_nodes_completed(&siblings, &to_update);

    Ok(TransitionOutcome {
        updated: to_update,
        new_ready,
        all_completed,
    })
}

/// Transition a node to FAILED.  Terminal; does not propagate to
/// dependents — they stay LOCKED unless a higher-level policy intervenes.
pub async fn transition_to_failed(
    tx: &mut dyn StoreTx,
    node: &mut WorkflowNode,
    extended_state: Option<String>,
) -> Result<(), EngineError> {
    if node.state == NodeState::Failed {
        return Ok(());
    }
    guard(node, NodeState::Failed)?;

    node.state = NodeState::Failed;
    node.extended_state = extended_state;
    tx.update_nodes(std::slice::from_ref(node)).await?;
    Ok(())
}

/// Transition a node to IN_PROGRESS, recording the plugin's extended state.
pub async fn transition_to_in_progress(
    tx: &mut dyn StoreTx,
    node: &mut WorkflowNode,
    extended_state: Option<String>,
) -> Result<(), EngineError> {
    if node.state == NodeState::InProgress && node.extended_state == extended_state {
        return Ok(());
    }
    if node.state != NodeState::InProgress {
        guard(node, NodeState::InProgress)?;
        node.state = NodeState::InProgress;
    }
    node.extended_state = extended_state;
    tx.update_nodes(std::slice::from_ref(node)).await?;
    Ok(())
}

/// Materialize workflow nodes from templates and resolve template-level
/// dependencies into node-level ones.
///
/// Nodes whose resolved dependency set is empty become READY immediately.
/// A dependency on a template that is not part of this workflow is dropped
/// (and logged); duplicates are deduplicated; a template depending on
/// itself is an error.
pub async fn initialize_nodes_from_templates(
    tx: &mut dyn StoreTx,
    consignment_id: Uuid,
    templates: &[NodeTemplate],
) -> Result<(Vec<WorkflowNode>, Vec<WorkflowNode>), EngineError> {
    if templates.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let template_by_id: HashMap<Uuid, &NodeTemplate> =
        templates.iter().map(|t| (t.id, t)).collect();

    // Create every node in LOCKED first so each one has an id to resolve
    // dependencies against.
    let nodes: Vec<WorkflowNode> = templates
        .iter()
        .map(|t| WorkflowNode::from_template(consignment_id, t.id))
        .collect();
    let mut nodes = tx.create_nodes(nodes).await?;

    let node_id_by_template: HashMap<Uuid, Uuid> =
        nodes.iter().map(|n| (n.template_id, n.id)).collect();

    let mut new_ready = Vec::new();
    for node in &mut nodes {
        let template = template_by_id
            .get(&node.template_id)
            .ok_or(db::DbError::NotFound)?;

        let mut seen = HashSet::new();
        let mut depends_on = Vec::new();
        for dep_template_id in &template.depends_on {
            if *dep_template_id == template.id {
                return Err(EngineError::SelfDependency(template.id));
            }
            if !seen.insert(*dep_template_id) {
                continue;
            }
            match node_id_by_template.get(dep_template_id) {
                Some(dep_node_id) => depends_on.push(*dep_node_id),
                None => {
                    warn!(
                        template_id = %template.id,
                        missing_dependency = %dep_template_id,
                        "dropping dependency on template outside this workflow"
                    );
                }
            }
        }

        if depends_on.is_empty() {
            node.state = NodeState::Ready;
        }
        node.depends_on = depends_on;
        if node.state == NodeState::Ready {
            new_ready.push(node.clone());
        }
    }

    tx.update_nodes(&nodes).await?;

    Ok((nodes, new_ready))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn guard(node: &WorkflowNode, to: NodeState) -> Result<(), EngineError> {
    let allowed = match to {
        NodeState::Completed | NodeState::Failed => {
            matches!(node.state, NodeState::Ready | NodeState::InProgress)
        }
        NodeState::InProgress => node.state == NodeState::Ready,
        NodeState::Ready => node.state == NodeState::Locked,
        NodeState::Locked => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            node_id: node.id,
            from: node.state,
            to,
        })
    }
}

/// Find every LOCKED sibling whose dependencies are satisfied once
/// `completed_id` counts as COMPLETED.  Returns the newly ready nodes
/// twice: once for the caller's result and once for the update batch.
fn unlock_dependent_nodes(
    siblings: &[WorkflowNode],
    completed_id: Uuid,
) -> (Vec<WorkflowNode>, Vec<WorkflowNode>) {
    let state_of: HashMap<Uuid, NodeState> = siblings
        .iter()
        .map(|n| {
            let state = if n.id == completed_id { NodeState::Completed } else { n.state };
            (n.id, state)
        })
        .collect();

    let mut new_ready = Vec::new();
    let mut unlocked = Vec::new();
    for sibling in siblings {
        if sibling.state != NodeState::Locked {
            continue;
        }
        let satisfied = sibling
            .depends_on
            .iter()
            .all(|dep| state_of.get(dep) == Some(&NodeState::Completed));
        if satisfied {
            let mut ready = sibling.clone();
            ready.state = NodeState::Ready;
            new_ready.push(ready.clone());
            unlocked.push(ready);
        }
    }
    (new_ready, unlocked)
}

/// Check completion across the sibling snapshot, projected through the
/// pending updates.
fn all_nodes_completed(siblings: &[WorkflowNode], updated: &[WorkflowNode]) -> bool {
    let updated_state: HashMap<Uuid, NodeState> =
        updated.iter().map(|n| (n.id, n.state)).collect();
    siblings.iter().all(|n| {
        let state = updated_state.get(&n.id).copied().unwrap_or(n.state);
        state == NodeState::Completed
    })
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use db::model::{Consignment, ConsignmentFlow, GlobalContext};
    use db::{MemoryStore, Store};
    use serde_json::json;

    fn template(deps: Vec<Uuid>) -> NodeTemplate {
        NodeTemplate {
            id: Uuid::new_v4(),
            task_type: "TRADER_FORM".into(),
            config: json!({}),
            depends_on: deps,
        }
    }

    async fn seeded_consignment(store: &MemoryStore) -> Uuid {
        let consignment =
            Consignment::new("trader-1", ConsignmentFlow::Import, vec![], GlobalContext::new());
        let id = consignment.id;
        let mut tx = store.begin().await.unwrap();
        tx.create_consignment(&consignment).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    /// Create nodes from templates in one committed transaction, returning
    /// (all nodes, new ready).
    async fn init(
        store: &MemoryStore,
        consignment_id: Uuid,
        templates: &[NodeTemplate],
    ) -> (Vec<WorkflowNode>, Vec<WorkflowNode>) {
        let mut tx = store.begin().await.unwrap();
        let result = initialize_nodes_from_templates(tx.as_mut(), consignment_id, templates)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        result
    }

    async fn complete(store: &MemoryStore, node_id: Uuid) -> TransitionOutcome {
        let mut tx = store.begin().await.unwrap();
        let mut node = tx.get_node(node_id).await.unwrap();
        let outcome = transition_to_completed(tx.as_mut(), &mut node, None)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        outcome
    }

    fn node_for<'a>(nodes: &'a [WorkflowNode], template: &NodeTemplate) -> &'a WorkflowNode {
        nodes
            .iter()
            .find(|n| n.template_id == template.id)
            .expect("node for template")
    }

    #[tokio::test]
    async fn nodes_without_dependencies_become_ready() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        let t1 = template(vec![]);
        let t2 = template(vec![t1.id]);
        let (nodes, ready) = init(&store, cid, &[t1.clone(), t2.clone()]).await;

        assert_eq!(nodes.len(), 2);
        assert_eq!(ready.len(), 1);
        assert_eq!(node_for(&nodes, &t1).state, NodeState::Ready);
        let n2 = node_for(&nodes, &t2);
        assert_eq!(n2.state, NodeState::Locked);
        assert_eq!(n2.depends_on, vec![node_for(&nodes, &t1).id]);
    }

    #[tokio::test]
    async fn empty_template_set_creates_nothing() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;
        let (nodes, ready) = init(&store, cid, &[]).await;
        assert!(nodes.is_empty());
        assert!(ready.is_empty());
    }

    #[tokio::test]
    async fn dependency_on_foreign_template_is_dropped() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        // t1 depends on a template that is not part of this workflow; the
        // dependency is dropped and t1 starts READY.
        let t1 = template(vec![Uuid::new_v4()]);
        let (nodes, ready) = init(&store, cid, &[t1.clone()]).await;

        assert_eq!(ready.len(), 1);
        assert_eq!(node_for(&nodes, &t1).state, NodeState::Ready);
        assert!(node_for(&nodes, &t1).depends_on.is_empty());
    }

    #[tokio::test]
    async fn duplicate_dependencies_are_deduplicated() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        let t1 = template(vec![]);
        let t2 = template(vec![t1.id, t1.id]);
        let (nodes, _) = init(&store, cid, &[t1.clone(), t2.clone()]).await;

        assert_eq!(node_for(&nodes, &t2).depends_on.len(), 1);
    }

    #[tokio::test]
    async fn self_dependency_is_an_error() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        let mut t1 = template(vec![]);
        t1.depends_on = vec![t1.id];

        let mut tx = store.begin().await.unwrap();
        let result = initialize_nodes_from_templates(tx.as_mut(), cid, &[t1.clone()]).await;
        assert!(matches!(result, Err(EngineError::SelfDependency(id)) if id == t1.id));
    }

    #[tokio::test]
    async fn linear_chain_unlocks_one_node_at_a_time() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        let t1 = template(vec![]);
        let t2 = template(vec![t1.id]);
        let t3 = template(vec![t2.id]);
        let (nodes, _) = init(&store, cid, &[t1.clone(), t2.clone(), t3.clone()]).await;
        let (n1, n2, n3) = (
            node_for(&nodes, &t1).id,
            node_for(&nodes, &t2).id,
            node_for(&nodes, &t3).id,
        );

        let outcome = complete(&store, n1).await;
        assert_eq!(outcome.new_ready.len(), 1);
        assert_eq!(outcome.new_ready[0].id, n2);
        assert!(!outcome.all_completed);
        assert_eq!(store.get_node(n3).await.unwrap().state, NodeState::Locked);

        let outcome = complete(&store, n2).await;
        assert_eq!(outcome.new_ready[0].id, n3);

        let outcome = complete(&store, n3).await;
        assert!(outcome.new_ready.is_empty());
        assert!(outcome.all_completed);
    }

    #[tokio::test]
    async fn diamond_join_waits_for_both_branches() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        // t1 → {t2, t3} → t4
        let t1 = template(vec![]);
        let t2 = template(vec![t1.id]);
        let t3 = template(vec![t1.id]);
        let t4 = template(vec![t2.id, t3.id]);
        let (nodes, ready) =
            init(&store, cid, &[t1.clone(), t2.clone(), t3.clone(), t4.clone()]).await;
        assert_eq!(ready.len(), 1);

        let (n1, n2, n3, n4) = (
            node_for(&nodes, &t1).id,
            node_for(&nodes, &t2).id,
            node_for(&nodes, &t3).id,
            node_for(&nodes, &t4).id,
        );

        // Completing the split point frees both branches.
        let outcome = complete(&store, n1).await;
        let mut freed: Vec<Uuid> = outcome.new_ready.iter().map(|n| n.id).collect();
        freed.sort();
        let mut expected = vec![n2, n3];
        expected.sort();
        assert_eq!(freed, expected);

        // One completed branch is not enough for the join.
        let outcome = complete(&store, n2).await;
        assert!(outcome.new_ready.is_empty());
        assert_eq!(store.get_node(n4).await.unwrap().state, NodeState::Locked);

        let outcome = complete(&store, n3).await;
        assert_eq!(outcome.new_ready.len(), 1);
        assert_eq!(outcome.new_ready[0].id, n4);

        let outcome = complete(&store, n4).await;
        assert!(outcome.all_completed);
    }

    #[tokio::test]
    async fn completing_twice_is_a_noop() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        let t1 = template(vec![]);
        let t2 = template(vec![t1.id]);
        let (nodes, _) = init(&store, cid, &[t1.clone(), t2.clone()]).await;
        let n1 = node_for(&nodes, &t1).id;

        complete(&store, n1).await;
        let batches_before = store.update_batches().len();

        let outcome = complete(&store, n1).await;
        assert!(outcome.updated.is_empty());
        assert!(outcome.new_ready.is_empty());
        assert!(!outcome.all_completed);
        // No additional batch was written.
        assert_eq!(store.update_batches().len(), batches_before);
    }

    #[tokio::test]
    async fn failure_is_terminal_and_does_not_propagate() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        let t1 = template(vec![]);
        let t2 = template(vec![t1.id]);
        let (nodes, _) = init(&store, cid, &[t1.clone(), t2.clone()]).await;
        let (n1, n2) = (node_for(&nodes, &t1).id, node_for(&nodes, &t2).id);

        let mut tx = store.begin().await.unwrap();
        let mut node = tx.get_node(n1).await.unwrap();
        transition_to_failed(tx.as_mut(), &mut node, Some("gateway timeout".into()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let failed = store.get_node(n1).await.unwrap();
        assert_eq!(failed.state, NodeState::Failed);
        assert_eq!(failed.extended_state.as_deref(), Some("gateway timeout"));
        assert_eq!(store.get_node(n2).await.unwrap().state, NodeState::Locked);

        // A terminal node cannot be completed afterwards.
        let mut tx = store.begin().await.unwrap();
        let mut node = tx.get_node(n1).await.unwrap();
        let result = transition_to_completed(tx.as_mut(), &mut node, None).await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidTransition { from: NodeState::Failed, .. })
        ));
    }

    #[tokio::test]
    async fn locked_node_cannot_complete() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        let t1 = template(vec![]);
        let t2 = template(vec![t1.id]);
        let (nodes, _) = init(&store, cid, &[t1.clone(), t2.clone()]).await;
        let n2 = node_for(&nodes, &t2).id;

        let mut tx = store.begin().await.unwrap();
        let mut node = tx.get_node(n2).await.unwrap();
        let result = transition_to_completed(tx.as_mut(), &mut node, None).await;
        assert!(matches!(
            result,
            Err(EngineError::InvalidTransition { from: NodeState::Locked, to: NodeState::Completed, .. })
        ));
    }

    #[tokio::test]
    async fn completion_batches_are_written_in_ascending_id_order() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;

        // A split point with several dependents makes the batch large
        // enough to be interesting.
        let t1 = template(vec![]);
        let t2 = template(vec![t1.id]);
        let t3 = template(vec![t1.id]);
        let t4 = template(vec![t1.id]);
        let (nodes, _) =
            init(&store, cid, &[t1.clone(), t2.clone(), t3.clone(), t4.clone()]).await;
        let n1 = node_for(&nodes, &t1).id;

        complete(&store, n1).await;

        let batches = store.update_batches();
        let last = batches.last().expect("completion wrote a batch");
        assert_eq!(last.len(), 4);
        let mut sorted = last.clone();
        sorted.sort();
        assert_eq!(*last, sorted);
    }

    #[tokio::test]
    async fn in_progress_records_extended_state_and_is_idempotent() {
        let store = MemoryStore::new();
        let cid = seeded_consignment(&store).await;
        let t1 = template(vec![]);
        let (nodes, _) = init(&store, cid, &[t1.clone()]).await;
        let n1 = node_for(&nodes, &t1).id;

        let mut tx = store.begin().await.unwrap();
        let mut node = tx.get_node(n1).await.unwrap();
        transition_to_in_progress(tx.as_mut(), &mut node, Some("NOTIFIED_SERVICE".into()))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = store.get_node(n1).await.unwrap();
        assert_eq!(stored.state, NodeState::InProgress);
        assert_eq!(stored.extended_state.as_deref(), Some("NOTIFIED_SERVICE"));

        // Same state and extended state: no write.
        let batches_before = store.update_batches().len();
        let mut tx = store.begin().await.unwrap();
        let mut node = tx.get_node(n1).await.unwrap();
        transition_to_in_progress(tx.as_mut(), &mut node, Some("NOTIFIED_SERVICE".into()))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.update_batches().len(), batches_before);
    }
}
