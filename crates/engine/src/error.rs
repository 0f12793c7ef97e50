//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::model::NodeState;

/// Errors produced by the workflow core (state machine + services).
#[derive(Debug, Error)]
pub enum EngineError {
    /// A state-transition guard rejected the requested transition.
    #[error("cannot transition node {node_id} from state {from} to {to}")]
    InvalidTransition {
        node_id: Uuid,
        from: NodeState,
        to: NodeState,
    },

    /// A node template lists itself as a dependency.
    #[error("node template {0} depends on itself")]
    SelfDependency(Uuid),

    /// Request-level validation failure.
    #[error("{0}")]
    Validation(String),

    /// Persistence error from the db crate.
    #[error("store error: {0}")]
    Store(#[from] db::DbError),

    /// Task-manager failure, e.g. during pre-commit registration.
    #[error("task manager error: {0}")]
    Task(#[from] task::TaskError),
}
