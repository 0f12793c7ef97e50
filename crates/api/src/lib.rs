//! `api` crate — HTTP REST API layer
//!
//! Exposes:
//!   POST   /api/v1/consignments
//!   GET    /api/v1/consignments?traderId={traderId}
//!   GET    /api/v1/consignments/:id
//!   POST   /api/v1/tasks/:id/execute
//!   GET    /api/v1/tasks/:id/render

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use engine::ConsignmentService;
use task::TaskManager;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub consignments: Arc<ConsignmentService>,
    pub tasks: Arc<TaskManager>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route(
            "/consignments",
            get(handlers::consignments::list).post(handlers::consignments::create),
        )
        .route("/consignments/:id", get(handlers::consignments::get))
        .route("/tasks/:id/execute", post(handlers::tasks::execute))
        .route("/tasks/:id/render", get(handlers::tasks::render));

    Router::new()
        .nest("/api/v1", api_router)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<(), std::io::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
