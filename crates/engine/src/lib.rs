//! `engine` crate — the workflow core: node state machine, transactional
//! consignment service, and the workflow manager that consumes plugin
//! notifications.

pub mod consignment;
pub mod error;
pub mod manager;
pub mod state_machine;

pub use consignment::{
    ConsignmentDetails, ConsignmentService, CreateConsignmentRequest, ItemRequest,
    UpdateNodeRequest,
};
pub use error::EngineError;
pub use manager::{ListenerHandle, TaskRegistrar, WorkflowManager};
pub use state_machine::TransitionOutcome;

#[cfg(test)]
mod manager_tests;
