//! Postgres implementation of the store contracts.
//!
//! Runtime-checked sqlx queries over plain `FromRow` row structs; the rows
//! are converted to domain types at the boundary.  Items, depends_on,
//! local_state and global_context are JSONB columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::DbError;
use crate::model::{
    Consignment, ConsignmentFlow, GlobalContext, NodeTemplate, WorkflowNode, WorkflowTemplate,
};
use crate::store::{Store, StoreTx, TemplateProvider};

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct ConsignmentRow {
    id: Uuid,
    trader_id: String,
    flow: String,
    items: Value,
    state: String,
    global_context: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ConsignmentRow {
    fn into_domain(self) -> Result<Consignment, DbError> {
        Ok(Consignment {
            id: self.id,
            trader_id: self.trader_id,
            flow: self.flow.parse().map_err(DbError::Decode)?,
            items: serde_json::from_value(self.items)?,
            state: self.state.parse().map_err(DbError::Decode)?,
            global_context: json_object(self.global_context),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NodeRow {
    id: Uuid,
    consignment_id: Uuid,
    template_id: Uuid,
    state: String,
    depends_on: Value,
    extended_state: Option<String>,
    local_state: Value,
    plugin_state: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl NodeRow {
    fn into_domain(self) -> Result<WorkflowNode, DbError> {
        Ok(WorkflowNode {
            id: self.id,
            consignment_id: self.consignment_id,
            template_id: self.template_id,
            state: self.state.parse().map_err(DbError::Decode)?,
            depends_on: serde_json::from_value(self.depends_on)?,
            extended_state: self.extended_state,
            local_state: json_object(self.local_state),
            plugin_state: self.plugin_state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WorkflowTemplateRow {
    id: Uuid,
    flow: String,
    node_templates: Value,
}

impl WorkflowTemplateRow {
    fn into_domain(self) -> Result<WorkflowTemplate, DbError> {
        Ok(WorkflowTemplate {
            id: self.id,
            flow: self.flow.parse().map_err(DbError::Decode)?,
            node_templates: serde_json::from_value(self.node_templates)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct NodeTemplateRow {
    id: Uuid,
    task_type: String,
    config: Value,
    depends_on: Value,
}

impl NodeTemplateRow {
    fn into_domain(self) -> Result<NodeTemplate, DbError> {
        Ok(NodeTemplate {
            id: self.id,
            task_type: self.task_type,
            config: self.config,
            depends_on: serde_json::from_value(self.depends_on)?,
        })
    }
}

fn json_object(value: Value) -> GlobalContext {
    match value {
        Value::Object(map) => map,
        _ => GlobalContext::new(),
    }
}

const NODE_COLUMNS: &str = "id, consignment_id, template_id, state, depends_on, extended_state, \
                            local_state, plugin_state, created_at, updated_at";

const CONSIGNMENT_COLUMNS: &str =
    "id, trader_id, flow, items, state, global_context, created_at, updated_at";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, DbError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn get_consignment(&self, id: Uuid) -> Result<Consignment, DbError> {
        let row = sqlx::query_as::<_, ConsignmentRow>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        row.into_domain()
    }

    async fn get_consignments_by_trader(&self, trader_id: &str) -> Result<Vec<Consignment>, DbError> {
        let rows = sqlx::query_as::<_, ConsignmentRow>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments WHERE trader_id = $1 ORDER BY created_at DESC"
        ))
        .bind(trader_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ConsignmentRow::into_domain).collect()
    }

    async fn get_node(&self, id: Uuid) -> Result<WorkflowNode, DbError> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        row.into_domain()
    }

    async fn get_nodes_by_consignment(&self, consignment_id: Uuid) -> Result<Vec<WorkflowNode>, DbError> {
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE consignment_id = $1 ORDER BY id"
        ))
        .bind(consignment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NodeRow::into_domain).collect()
    }

    async fn get_nodes_by_consignments(&self, consignment_ids: &[Uuid]) -> Result<Vec<WorkflowNode>, DbError> {
        if consignment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE consignment_id = ANY($1) ORDER BY id"
        ))
        .bind(consignment_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NodeRow::into_domain).collect()
    }

    async fn get_local_state(&self, node_id: Uuid) -> Result<GlobalContext, DbError> {
        let value = sqlx::query_scalar::<_, Value>(
            "SELECT local_state FROM workflow_nodes WHERE id = $1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(json_object(value))
    }

    async fn update_local_state(&self, node_id: Uuid, state: GlobalContext) -> Result<(), DbError> {
        // 0 rows affected means the node row is not committed yet; the
        // write-through cache keeps the value until reconstruction.
        sqlx::query("UPDATE workflow_nodes SET local_state = $1, updated_at = $2 WHERE id = $3")
            .bind(Value::Object(state))
            .bind(Utc::now())
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_plugin_state(&self, node_id: Uuid) -> Result<Option<String>, DbError> {
        sqlx::query_scalar::<_, Option<String>>(
            "SELECT plugin_state FROM workflow_nodes WHERE id = $1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)
    }

    async fn update_plugin_state(&self, node_id: Uuid, state: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE workflow_nodes SET plugin_state = $1, updated_at = $2 WHERE id = $3")
            .bind(state)
            .bind(Utc::now())
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn create_consignment(&mut self, consignment: &Consignment) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO consignments (id, trader_id, flow, items, state, global_context, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(consignment.id)
        .bind(&consignment.trader_id)
        .bind(consignment.flow.to_string())
        .bind(serde_json::to_value(&consignment.items)?)
        .bind(consignment.state.to_string())
        .bind(Value::Object(consignment.global_context.clone()))
        .bind(consignment.created_at)
        .bind(consignment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn get_consignment(&mut self, id: Uuid) -> Result<Consignment, DbError> {
        let row = sqlx::query_as::<_, ConsignmentRow>(&format!(
            "SELECT {CONSIGNMENT_COLUMNS} FROM consignments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(DbError::NotFound)?;
        row.into_domain()
    }

    async fn update_consignment(&mut self, consignment: &Consignment) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE consignments SET state = $1, global_context = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(consignment.state.to_string())
        .bind(Value::Object(consignment.global_context.clone()))
        .bind(Utc::now())
        .bind(consignment.id)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get_node(&mut self, id: Uuid) -> Result<WorkflowNode, DbError> {
        let row = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or(DbError::NotFound)?;
        row.into_domain()
    }

    async fn get_nodes_by_ids(&mut self, ids: &[Uuid]) -> Result<Vec<WorkflowNode>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids.to_vec())
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(NodeRow::into_domain).collect()
    }

    async fn get_nodes_by_consignment(&mut self, consignment_id: Uuid) -> Result<Vec<WorkflowNode>, DbError> {
        let rows = sqlx::query_as::<_, NodeRow>(&format!(
            "SELECT {NODE_COLUMNS} FROM workflow_nodes WHERE consignment_id = $1 ORDER BY id FOR UPDATE"
        ))
        .bind(consignment_id)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.into_iter().map(NodeRow::into_domain).collect()
    }

    async fn create_nodes(&mut self, nodes: Vec<WorkflowNode>) -> Result<Vec<WorkflowNode>, DbError> {
        for node in &nodes {
            sqlx::query(
                "INSERT INTO workflow_nodes \
                 (id, consignment_id, template_id, state, depends_on, extended_state, local_state, plugin_state, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(node.id)
            .bind(node.consignment_id)
            .bind(node.template_id)
            .bind(node.state.to_string())
            .bind(serde_json::to_value(&node.depends_on)?)
            .bind(node.extended_state.as_deref())
            .bind(Value::Object(node.local_state.clone()))
            .bind(node.plugin_state.as_deref())
            .bind(node.created_at)
            .bind(node.updated_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(nodes)
    }

    async fn update_nodes(&mut self, nodes: &[WorkflowNode]) -> Result<(), DbError> {
        for node in nodes {
            let result = sqlx::query(
                "UPDATE workflow_nodes SET state = $1, extended_state = $2, depends_on = $3, updated_at = $4 \
                 WHERE id = $5",
            )
            .bind(node.state.to_string())
            .bind(node.extended_state.as_deref())
            .bind(serde_json::to_value(&node.depends_on)?)
            .bind(Utc::now())
            .bind(node.id)
            .execute(&mut *self.tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(DbError::NotFound);
            }
        }
        Ok(())
    }

    async fn count_incomplete_nodes(&mut self, consignment_id: Uuid) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM workflow_nodes WHERE consignment_id = $1 AND state != $2",
        )
        .bind(consignment_id)
        .bind(crate::model::NodeState::Completed.to_string())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[async_trait]
impl TemplateProvider for PgStore {
    async fn workflow_template_by_hs_code_and_flow(
        &self,
        hs_code: &str,
        flow: ConsignmentFlow,
    ) -> Result<WorkflowTemplate, DbError> {
        let row = sqlx::query_as::<_, WorkflowTemplateRow>(
            "SELECT wt.id, wt.flow, wt.node_templates \
             FROM workflow_templates wt \
             JOIN workflow_template_maps m ON m.workflow_template_id = wt.id \
             WHERE m.hs_code = $1 AND m.flow = $2",
        )
        .bind(hs_code)
        .bind(flow.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        row.into_domain()
    }

    async fn workflow_template_by_id(&self, id: Uuid) -> Result<WorkflowTemplate, DbError> {
        let row = sqlx::query_as::<_, WorkflowTemplateRow>(
            "SELECT id, flow, node_templates FROM workflow_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        row.into_domain()
    }

    async fn node_templates_by_ids(&self, ids: &[Uuid]) -> Result<Vec<NodeTemplate>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, NodeTemplateRow>(
            "SELECT id, task_type, config, depends_on FROM workflow_node_templates WHERE id = ANY($1)",
        )
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(NodeTemplateRow::into_domain).collect()
    }

    async fn node_template_by_id(&self, id: Uuid) -> Result<NodeTemplate, DbError> {
        let row = sqlx::query_as::<_, NodeTemplateRow>(
            "SELECT id, task_type, config, depends_on FROM workflow_node_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        row.into_domain()
    }
}
