pub mod consignments;
pub mod tasks;

use axum::http::StatusCode;
use engine::EngineError;
use plugins::PluginError;
use task::TaskError;

/// Map core errors onto HTTP status codes.
pub(crate) fn engine_error_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidTransition { .. } | EngineError::SelfDependency(_) => {
            StatusCode::CONFLICT
        }
        EngineError::Store(db::DbError::NotFound) => StatusCode::NOT_FOUND,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::Task(task_error) => task_error_status(task_error),
    }
}

pub(crate) fn task_error_status(error: &TaskError) -> StatusCode {
    match error {
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::InvalidState { .. } => StatusCode::CONFLICT,
        TaskError::Plugin(PluginError::UnknownType(_))
        | TaskError::Plugin(PluginError::Config(_))
        | TaskError::Plugin(PluginError::UnsupportedAction(_)) => StatusCode::BAD_REQUEST,
        TaskError::Plugin(PluginError::Upstream(_)) => StatusCode::BAD_GATEWAY,
        TaskError::Store(db::DbError::NotFound) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
