//! `MockPlugin` — a scripted test double for `Plugin`.
//!
//! Useful in unit and integration tests where a real plugin implementation
//! is either unavailable or irrelevant.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::contract::{
    ExecutionRequest, ExecutionResponse, Plugin, PluginApi, PluginState, RenderInfo, TaskType,
};
use crate::PluginError;

/// Behaviour injected into `MockPlugin` at construction time.
#[derive(Clone)]
pub enum MockBehaviour {
    /// Return a response requesting the given transition (or none).
    Respond(Option<PluginState>),
    /// Fail with an `Upstream` error.
    Fail(String),
    /// Panic, for exercising the task manager's recovery path.
    Panic(String),
}

/// A mock plugin that records every call it receives and follows a
/// programmer-specified script.
pub struct MockPlugin {
    /// Label used in test assertions.
    pub name: String,
    start_behaviour: MockBehaviour,
    execute_behaviour: MockBehaviour,
    /// Number of `start` invocations.
    pub start_calls: Arc<Mutex<u32>>,
    /// Every request seen by `execute`, in call order.
    pub execute_calls: Arc<Mutex<Vec<ExecutionRequest>>>,
    api: Option<Arc<dyn PluginApi>>,
}

impl MockPlugin {
    pub fn new(
        name: impl Into<String>,
        start_behaviour: MockBehaviour,
        execute_behaviour: MockBehaviour,
    ) -> Self {
        Self {
            name: name.into(),
            start_behaviour,
            execute_behaviour,
            start_calls: Arc::new(Mutex::new(0)),
            execute_calls: Arc::new(Mutex::new(Vec::new())),
            api: None,
        }
    }

    /// Start parks the task in IN_PROGRESS; execute completes it.
    pub fn interactive(name: impl Into<String>) -> Self {
        Self::new(
            name,
            MockBehaviour::Respond(Some(PluginState::InProgress)),
            MockBehaviour::Respond(Some(PluginState::Completed)),
        )
    }

    /// Start completes the task immediately.
    pub fn completing_on_start(name: impl Into<String>) -> Self {
        Self::new(
            name,
            MockBehaviour::Respond(Some(PluginState::Completed)),
            MockBehaviour::Respond(None),
        )
    }

    /// Start fails with an `Upstream` error.
    pub fn failing_on_start(name: impl Into<String>, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self::new(name, MockBehaviour::Fail(msg.clone()), MockBehaviour::Fail(msg))
    }

    /// Execute panics; start parks the task in IN_PROGRESS.
    pub fn panicking_on_execute(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(
            name,
            MockBehaviour::Respond(Some(PluginState::InProgress)),
            MockBehaviour::Panic(msg.into()),
        )
    }

    /// Start panics.
    pub fn panicking_on_start(name: impl Into<String>, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self::new(name, MockBehaviour::Panic(msg.clone()), MockBehaviour::Panic(msg))
    }

    /// Number of times `start` has run.
    pub fn start_count(&self) -> u32 {
        *self.start_calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of times `execute` has run.
    pub fn execute_count(&self) -> usize {
        self.execute_calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn respond(&self, behaviour: &MockBehaviour) -> Result<ExecutionResponse, PluginError> {
        match behaviour {
            MockBehaviour::Respond(new_state) => Ok(ExecutionResponse {
                new_state: *new_state,
                extended_state: None,
                append_global_context: None,
                message: format!("mock plugin '{}' responded", self.name),
                data: None,
            }),
            MockBehaviour::Fail(msg) => Err(PluginError::Upstream(msg.clone())),
            MockBehaviour::Panic(msg) => panic!("{msg}"),
        }
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn init(&mut self, api: Arc<dyn PluginApi>) {
        self.api = Some(api);
    }

    async fn start(&self) -> Result<ExecutionResponse, PluginError> {
        *self.start_calls.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.respond(&self.start_behaviour)
    }

    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResponse, PluginError> {
        self.execute_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.respond(&self.execute_behaviour)
    }

    async fn render_info(&self) -> Result<RenderInfo, PluginError> {
        let api = self.api.as_ref().ok_or(PluginError::NotInitialized)?;
        Ok(RenderInfo {
            task_type: TaskType::TraderForm,
            state: api.task_state().await,
            plugin_state: api.plugin_state().await,
            content: None,
        })
    }
}
