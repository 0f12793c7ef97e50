//! Task-manager-level error type.

use thiserror::Error;
use uuid::Uuid;

use db::model::NodeState;

#[derive(Debug, Error)]
pub enum TaskError {
    /// The task exists in neither the cache nor the database.
    #[error("task {0} not found")]
    NotFound(Uuid),

    /// `execute_task` was invoked on a node that is not runnable.
    #[error("task {task_id} is not runnable in state {state}")]
    InvalidState { task_id: Uuid, state: NodeState },

    #[error(transparent)]
    Plugin(#[from] plugins::PluginError),

    /// The plugin panicked; the container has been evicted.
    #[error("plugin panicked: {0}")]
    PluginPanic(String),

    #[error("store error: {0}")]
    Store(#[from] db::DbError),

    /// The workflow manager side of the notification channel is gone.
    #[error("notification channel closed")]
    NotificationChannelClosed,
}
