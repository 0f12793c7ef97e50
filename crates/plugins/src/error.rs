//! Plugin-level error type.

use thiserror::Error;

/// Errors returned by plugin construction and plugin lifecycle methods.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin factory was handed a type tag it does not recognize.
    #[error("unknown task type: {0}")]
    UnknownType(String),

    /// Missing or ill-typed plugin configuration.
    #[error("invalid plugin config: {0}")]
    Config(String),

    /// The plugin does not understand the requested action.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// An outbound call to an external service failed (after retries).
    #[error("upstream service error: {0}")]
    Upstream(String),

    /// A lifecycle method was invoked before `init`.
    #[error("plugin is not initialized")]
    NotInitialized,

    /// Write-through persistence of plugin state failed.
    #[error("state persistence failed: {0}")]
    Store(#[from] db::DbError),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
