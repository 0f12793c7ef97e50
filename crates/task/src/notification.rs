//! The message plugins use to report state transitions to the workflow
//! manager.

use tokio::sync::mpsc;
use uuid::Uuid;

use db::model::GlobalContext;
use plugins::PluginState;

/// Default bound of the notification channel. Producers block when it is
/// full; a slow listener slows plugins down instead of growing memory.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// A plugin-reported update. Every field except `task_id` is optional; a
/// notification carrying none of them is a no-op.
#[derive(Debug, Clone)]
pub struct Notification {
    pub task_id: Uuid,
    pub updated_state: Option<PluginState>,
    pub append_global_context: Option<GlobalContext>,
    pub extended_state: Option<String>,
}

pub type NotificationSender = mpsc::Sender<Notification>;
pub type NotificationReceiver = mpsc::Receiver<Notification>;

/// Create the bounded notification channel.
pub fn notification_channel(capacity: usize) -> (NotificationSender, NotificationReceiver) {
    let capacity = if capacity == 0 { DEFAULT_CHANNEL_CAPACITY } else { capacity };
    mpsc::channel(capacity)
}
