//! `task` crate — the runtime that drives plugins on behalf of the
//! workflow engine.
//!
//! A [`container::Container`] wraps one plugin instance per active node,
//! the [`cache::ContainerCache`] keeps the hot ones resident, and the
//! [`manager::TaskManager`] owns both, forwarding every plugin-reported
//! transition onto the notification channel for the workflow manager to
//! consume.

pub mod cache;
pub mod container;
pub mod error;
pub mod local_state;
pub mod manager;
pub mod notification;

pub use cache::ContainerCache;
pub use container::{Container, SharedGlobalContext};
pub use error::TaskError;
pub use manager::{InitTaskRequest, TaskManager};
pub use notification::{notification_channel, Notification, NotificationSender};
