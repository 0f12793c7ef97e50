//! Plugin construction — maps a template's type tag to an executor.

use serde_json::Value;

use crate::contract::{Plugin, TaskType};
use crate::form::FormPlugin;
use crate::payment::PaymentPlugin;
use crate::wait_for_event::WaitForEventPlugin;
use crate::PluginError;

/// Builds plugin instances from a type tag and an opaque config blob.
///
/// A trait so tests (and future out-of-tree registries) can substitute
/// their own executors; production code uses [`DefaultPluginFactory`].
pub trait PluginFactory: Send + Sync {
    fn build_executor(&self, task_type: &str, config: &Value) -> Result<Box<dyn Plugin>, PluginError>;
}

/// The built-in factory covering the closed set of task types.
#[derive(Debug, Default, Clone)]
pub struct DefaultPluginFactory;

impl PluginFactory for DefaultPluginFactory {
    fn build_executor(&self, task_type: &str, config: &Value) -> Result<Box<dyn Plugin>, PluginError> {
        let task_type: TaskType = task_type.parse()?;
        match task_type {
            // Document submission is a form task; it has no dedicated executor.
            TaskType::TraderForm | TaskType::OgaForm | TaskType::DocumentSubmission => {
                Ok(Box::new(FormPlugin::new(task_type, config)?))
            }
            TaskType::WaitForEvent => Ok(Box::new(WaitForEventPlugin::new(config)?)),
            TaskType::Payment => Ok(Box::new(PaymentPlugin::new())),
        }
    }
}
