//! `plugins` crate — the `Plugin` contract and built-in plugin implementations.
//!
//! Every plugin — built-in and future out-of-tree alike — implements
//! [`Plugin`] and talks to the outside world exclusively through the
//! [`PluginApi`] its task container hands it at init time.  The task
//! manager dispatches work through these trait objects.

pub mod contract;
pub mod error;
pub mod factory;
pub mod form;
pub mod mock;
pub mod payment;
pub mod wait_for_event;

pub use contract::{ExecutionRequest, ExecutionResponse, Plugin, PluginApi, PluginState, RenderInfo, TaskType};
pub use error::PluginError;
pub use factory::{DefaultPluginFactory, PluginFactory};

#[cfg(test)]
pub(crate) mod test_support;
