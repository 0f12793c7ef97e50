use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use engine::{ConsignmentDetails, CreateConsignmentRequest};

use super::engine_error_status;
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraderQuery {
    pub trader_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateConsignmentRequest>,
) -> Result<(StatusCode, Json<ConsignmentDetails>), StatusCode> {
    match state.consignments.initialize_consignment(payload).await {
        Ok(details) => Ok((StatusCode::CREATED, Json(details))),
        Err(e) => {
            error!(error = %e, "failed to create consignment");
            Err(engine_error_status(&e))
        }
    }
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ConsignmentDetails>, StatusCode> {
    match state.consignments.get_by_id(id).await {
        Ok(details) => Ok(Json(details)),
        Err(e) => Err(engine_error_status(&e)),
    }
}

pub async fn list(
    Query(query): Query<TraderQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ConsignmentDetails>>, StatusCode> {
    match state.consignments.get_by_trader_id(&query.trader_id).await {
        Ok(details) => Ok(Json(details)),
        Err(e) => Err(engine_error_status(&e)),
    }
}
