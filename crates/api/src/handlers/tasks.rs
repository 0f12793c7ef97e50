use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use plugins::{ExecutionRequest, RenderInfo};

use super::task_error_status;
use crate::AppState;

/// Caller-facing execution result: the internal state fields stay inside
/// the engine.
#[derive(Serialize)]
pub struct ExecuteTaskResponse {
    pub message: String,
    pub data: Option<Value>,
}

pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ExecutionRequest>,
) -> Result<Json<ExecuteTaskResponse>, StatusCode> {
    match state.tasks.execute_task(id, payload).await {
        Ok(response) => Ok(Json(ExecuteTaskResponse {
            message: response.message,
            data: response.data,
        })),
        Err(e) => {
            error!(task_id = %id, error = %e, "task execution failed");
            Err(task_error_status(&e))
        }
    }
}

pub async fn render(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<RenderInfo>, StatusCode> {
    match state.tasks.render_info(id).await {
        Ok(info) => Ok(Json(info)),
        Err(e) => Err(task_error_status(&e)),
    }
}
