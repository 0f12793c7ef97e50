//! Integration tests for the consignment service and workflow manager.
//!
//! These run against the in-memory store and the real plugin factory, so
//! the full creation → notification → propagation → registration loop is
//! exercised without Postgres or HTTP.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use db::model::{
    ConsignmentFlow, ConsignmentState, GlobalContext, NodeState, NodeTemplate, WorkflowTemplate,
};
use db::{MemoryStore, Store};
use plugins::{DefaultPluginFactory, ExecutionRequest, PluginError, PluginState};
use task::notification::NotificationReceiver;
use task::{notification_channel, Notification, TaskError, TaskManager};

use crate::consignment::{ConsignmentService, CreateConsignmentRequest, ItemRequest};
use crate::error::EngineError;
use crate::manager::WorkflowManager;

const HS_CODE: &str = "8471.30";

struct Harness {
    store: Arc<MemoryStore>,
    task_manager: Arc<TaskManager>,
    consignments: Arc<ConsignmentService>,
    manager: Arc<WorkflowManager>,
    rx: NotificationReceiver,
}

fn form_template(deps: Vec<Uuid>) -> NodeTemplate {
    NodeTemplate {
        id: Uuid::new_v4(),
        task_type: "TRADER_FORM".into(),
        config: json!({
            "formId": "declaration",
            "title": "Declaration",
            "jsonSchema": { "type": "object" },
        }),
        depends_on: deps,
    }
}

/// Build the full stack over an in-memory store seeded with one workflow
/// template (mapped to `HS_CODE`/IMPORT) made of the given node templates.
fn harness(templates: &[NodeTemplate]) -> Harness {
    let store = Arc::new(MemoryStore::new());
    for template in templates {
        store.insert_node_template(template.clone());
    }
    let workflow_template = WorkflowTemplate {
        id: Uuid::new_v4(),
        flow: ConsignmentFlow::Import,
        node_templates: templates.iter().map(|t| t.id).collect(),
    };
    store.map_hs_code(HS_CODE, ConsignmentFlow::Import, workflow_template.id);
    store.insert_workflow_template(workflow_template);

    let (tx, rx) = notification_channel(100);
    let task_manager = Arc::new(TaskManager::new(
        store.clone(),
        store.clone(),
        Arc::new(DefaultPluginFactory),
        tx,
        100,
    ));
    let consignments = Arc::new(ConsignmentService::new(store.clone(), store.clone()));
    let manager = WorkflowManager::new(task_manager.clone(), store.clone(), consignments.clone());

    Harness { store, task_manager, consignments, manager, rx }
}

fn create_request() -> CreateConsignmentRequest {
    CreateConsignmentRequest {
        trader_id: "trader-7".into(),
        flow: ConsignmentFlow::Import,
        items: vec![ItemRequest {
            hs_code: HS_CODE.into(),
            metadata: json!({ "description": "laptops", "quantity": 40 }),
        }],
        global_context: GlobalContext::new(),
    }
}

impl Harness {
    /// Process queued notifications (including the ones produced while
    /// processing) until the channel is empty.
    async fn drain(&mut self) {
        while let Ok(notification) = self.rx.try_recv() {
            self.manager.handle_notification(notification).await;
        }
    }

    async fn submit_form(&self, node_id: Uuid) {
        self.task_manager
            .execute_task(
                node_id,
                ExecutionRequest {
                    action: "SUBMIT_FORM".into(),
                    payload: Some(json!({ "accepted": true })),
                },
            )
            .await
            .expect("form submission should succeed");
    }

    async fn node_state(&self, node_id: Uuid) -> NodeState {
        self.store.get_node(node_id).await.unwrap().state
    }
}

fn node_id_for(details: &crate::ConsignmentDetails, template: &NodeTemplate) -> Uuid {
    details
        .workflow_nodes
        .iter()
        .find(|n| n.template_id == template.id)
        .expect("node for template")
        .id
}

// ============================================================
// Creation
// ============================================================

#[tokio::test]
async fn creation_readies_roots_and_registers_them() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![t1.id]);
    let mut h = harness(&[t1.clone(), t2.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    assert_eq!(details.consignment.state, ConsignmentState::InProgress);
    assert_eq!(details.workflow_nodes.len(), 2);

    let n1 = node_id_for(&details, &t1);
    let n2 = node_id_for(&details, &t2);
    assert_eq!(h.node_state(n1).await, NodeState::Ready);
    assert_eq!(h.node_state(n2).await, NodeState::Locked);

    // Only the root was registered with the task manager.
    assert_eq!(h.task_manager.cache_len(), 1);

    // Its form plugin reported IN_PROGRESS on start.
    let started = h.rx.try_recv().unwrap();
    assert_eq!(started.task_id, n1);
    assert_eq!(started.updated_state, Some(PluginState::InProgress));
}

#[tokio::test]
async fn creation_with_zero_items_is_rejected() {
    let t1 = form_template(vec![]);
    let h = harness(&[t1]);

    let mut request = create_request();
    request.items.clear();

    let result = h.consignments.initialize_consignment(request).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_eq!(h.store.consignment_count(), 0);
}

#[tokio::test]
async fn creation_with_unmapped_hs_code_is_not_found() {
    let t1 = form_template(vec![]);
    let h = harness(&[t1]);

    let mut request = create_request();
    request.items[0].hs_code = "0000.00".into();

    let result = h.consignments.initialize_consignment(request).await;
    assert!(matches!(result, Err(EngineError::Store(db::DbError::NotFound))));
    assert_eq!(h.store.consignment_count(), 0);
}

#[tokio::test]
async fn creation_rolls_back_when_plugin_type_is_unknown() {
    // The workflow's only root node has an unrecognized type tag, so the
    // pre-commit registration fails and the whole creation must vanish.
    let mut bad = form_template(vec![]);
    bad.task_type = "QUANTUM_FORM".into();
    let follower = form_template(vec![bad.id]);
    let h = harness(&[bad, follower]);

    let result = h.consignments.initialize_consignment(create_request()).await;

    assert!(matches!(
        result,
        Err(EngineError::Task(TaskError::Plugin(PluginError::UnknownType(_))))
    ));
    assert_eq!(h.store.consignment_count(), 0);
    assert_eq!(h.store.node_count(), 0);
    assert_eq!(h.task_manager.cache_len(), 0);
}

// ============================================================
// Linear workflow (scenario: n1 → n2 → n3)
// ============================================================

#[tokio::test]
async fn linear_workflow_runs_to_finished() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![t1.id]);
    let t3 = form_template(vec![t2.id]);
    let mut h = harness(&[t1.clone(), t2.clone(), t3.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let cid = details.consignment.id;
    let (n1, n2, n3) = (
        node_id_for(&details, &t1),
        node_id_for(&details, &t2),
        node_id_for(&details, &t3),
    );
    h.drain().await;

    h.submit_form(n1).await;
    h.drain().await;
    assert_eq!(h.node_state(n1).await, NodeState::Completed);
    assert_eq!(h.node_state(n2).await, NodeState::Ready);
    assert_eq!(h.node_state(n3).await, NodeState::Locked);
    assert_eq!(h.task_manager.cache_len(), 2);

    h.submit_form(n2).await;
    h.drain().await;
    assert_eq!(h.node_state(n3).await, NodeState::Ready);

    h.submit_form(n3).await;
    h.drain().await;

    assert_eq!(h.node_state(n3).await, NodeState::Completed);
    let consignment = h.store.get_consignment(cid).await.unwrap();
    assert_eq!(consignment.state, ConsignmentState::Finished);
}

#[tokio::test]
async fn executing_a_locked_node_is_rejected() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![t1.id]);
    let mut h = harness(&[t1.clone(), t2.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let n2 = node_id_for(&details, &t2);
    h.drain().await;

    let result = h
        .task_manager
        .execute_task(n2, ExecutionRequest { action: "SUBMIT_FORM".into(), payload: Some(json!({})) })
        .await;
    assert!(matches!(result, Err(TaskError::InvalidState { state: NodeState::Locked, .. })));
}

// ============================================================
// Diamond (scenario: n1 → {n2, n3} → n4)
// ============================================================

#[tokio::test]
async fn diamond_join_requires_both_branches() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![t1.id]);
    let t3 = form_template(vec![t1.id]);
    let t4 = form_template(vec![t2.id, t3.id]);
    let mut h = harness(&[t1.clone(), t2.clone(), t3.clone(), t4.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let cid = details.consignment.id;
    let (n1, n2, n3, n4) = (
        node_id_for(&details, &t1),
        node_id_for(&details, &t2),
        node_id_for(&details, &t3),
        node_id_for(&details, &t4),
    );
    h.drain().await;

    h.submit_form(n1).await;
    h.drain().await;
    assert_eq!(h.node_state(n2).await, NodeState::Ready);
    assert_eq!(h.node_state(n3).await, NodeState::Ready);
    assert_eq!(h.node_state(n4).await, NodeState::Locked);
    assert_eq!(h.task_manager.cache_len(), 3);

    h.submit_form(n2).await;
    h.drain().await;
    assert_eq!(h.node_state(n4).await, NodeState::Locked);

    h.submit_form(n3).await;
    h.drain().await;
    assert_eq!(h.node_state(n4).await, NodeState::Ready);

    h.submit_form(n4).await;
    h.drain().await;
    assert_eq!(
        h.store.get_consignment(cid).await.unwrap().state,
        ConsignmentState::Finished
    );
}

// ============================================================
// Failure and idempotency
// ============================================================

#[tokio::test]
async fn failed_node_keeps_consignment_in_progress() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![t1.id]);
    let t3 = form_template(vec![t2.id]);
    let mut h = harness(&[t1.clone(), t2.clone(), t3.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let cid = details.consignment.id;
    let (n1, n2, n3) = (
        node_id_for(&details, &t1),
        node_id_for(&details, &t2),
        node_id_for(&details, &t3),
    );
    h.drain().await;

    h.manager
        .handle_notification(Notification {
            task_id: n1,
            updated_state: Some(PluginState::Failed),
            append_global_context: None,
            extended_state: Some("validation rejected".into()),
        })
        .await;

    assert_eq!(h.node_state(n1).await, NodeState::Failed);
    assert_eq!(h.node_state(n2).await, NodeState::Locked);
    assert_eq!(h.node_state(n3).await, NodeState::Locked);
    assert_eq!(
        h.store.get_consignment(cid).await.unwrap().state,
        ConsignmentState::InProgress
    );
}

#[tokio::test]
async fn duplicate_completion_notifications_are_absorbed() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![t1.id]);
    let mut h = harness(&[t1.clone(), t2.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let n1 = node_id_for(&details, &t1);
    h.drain().await;

    let completion = Notification {
        task_id: n1,
        updated_state: Some(PluginState::Completed),
        append_global_context: None,
        extended_state: None,
    };
    h.manager.handle_notification(completion.clone()).await;
    h.drain().await;
    let batches_after_first = h.store.update_batches().len();

    // At-least-once delivery: the same notification arrives again.
    h.manager.handle_notification(completion).await;
    h.drain().await;

    assert_eq!(h.store.update_batches().len(), batches_after_first);
    assert_eq!(h.node_state(n1).await, NodeState::Completed);
}

#[tokio::test]
async fn notification_without_state_is_dropped() {
    let t1 = form_template(vec![]);
    let mut h = harness(&[t1.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let n1 = node_id_for(&details, &t1);
    h.drain().await;

    h.manager
        .handle_notification(Notification {
            task_id: n1,
            updated_state: None,
            append_global_context: Some(GlobalContext::new()),
            extended_state: None,
        })
        .await;

    // State unchanged; the message was dropped.
    assert_eq!(h.node_state(n1).await, NodeState::Ready);
}

#[tokio::test]
async fn listener_survives_updates_for_unknown_nodes() {
    let t1 = form_template(vec![]);
    let mut h = harness(&[t1.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let n1 = node_id_for(&details, &t1);
    h.drain().await;

    // A notification for a node that does not exist is logged and skipped.
    h.manager
        .handle_notification(Notification {
            task_id: Uuid::new_v4(),
            updated_state: Some(PluginState::Completed),
            append_global_context: None,
            extended_state: None,
        })
        .await;

    // Processing continues normally afterwards.
    h.submit_form(n1).await;
    h.drain().await;
    assert_eq!(h.node_state(n1).await, NodeState::Completed);
}

// ============================================================
// Global context
// ============================================================

#[tokio::test]
async fn global_context_merges_across_completions() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![]);
    let mut h = harness(&[t1.clone(), t2.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let cid = details.consignment.id;
    let (n1, n2) = (node_id_for(&details, &t1), node_id_for(&details, &t2));
    h.drain().await;

    let mut ctx_a = GlobalContext::new();
    ctx_a.insert("a".into(), json!(1));
    h.manager
        .handle_notification(Notification {
            task_id: n1,
            updated_state: Some(PluginState::Completed),
            append_global_context: Some(ctx_a),
            extended_state: None,
        })
        .await;

    let mut ctx_b = GlobalContext::new();
    ctx_b.insert("b".into(), json!(2));
    h.manager
        .handle_notification(Notification {
            task_id: n2,
            updated_state: Some(PluginState::Completed),
            append_global_context: Some(ctx_b),
            extended_state: None,
        })
        .await;

    let consignment = h.store.get_consignment(cid).await.unwrap();
    assert_eq!(consignment.global_context.get("a"), Some(&json!(1)));
    assert_eq!(consignment.global_context.get("b"), Some(&json!(2)));
    assert_eq!(consignment.state, ConsignmentState::Finished);
}

// ============================================================
// Read projections
// ============================================================

#[tokio::test]
async fn trader_projection_batches_nodes_per_consignment() {
    let t1 = form_template(vec![]);
    let h = harness(&[t1.clone()]);

    let first = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let second = h.consignments.initialize_consignment(create_request()).await.unwrap();

    let listed = h.consignments.get_by_trader_id("trader-7").await.unwrap();
    assert_eq!(listed.len(), 2);
    for details in &listed {
        assert_eq!(details.workflow_nodes.len(), 1);
    }

    let fetched = h.consignments.get_by_id(first.consignment.id).await.unwrap();
    assert_eq!(fetched.consignment.id, first.consignment.id);
    assert_ne!(first.consignment.id, second.consignment.id);

    assert!(h.consignments.get_by_trader_id("somebody-else").await.unwrap().is_empty());
}

// ============================================================
// Spawned listener
// ============================================================

#[tokio::test]
async fn spawned_listener_processes_notifications_until_stopped() {
    let t1 = form_template(vec![]);
    let t2 = form_template(vec![t1.id]);
    let mut h = harness(&[t1.clone(), t2.clone()]);

    let details = h.consignments.initialize_consignment(create_request()).await.unwrap();
    let (n1, n2) = (node_id_for(&details, &t1), node_id_for(&details, &t2));

    // Hand the receiver to a real listener task.
    let rx = std::mem::replace(&mut h.rx, notification_channel(1).1);
    let listener = h.manager.spawn_listener(rx);

    h.submit_form(n1).await;

    // Wait for the listener to complete the propagation.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if h.node_state(n1).await == NodeState::Completed
            && h.node_state(n2).await == NodeState::Ready
        {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "listener did not propagate in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    listener.stop().await;
}
