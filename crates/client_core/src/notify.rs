//! Transient user notifications and the callback set that produces them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::BlockId;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::CommandCallbacks;

pub const LOAD_MESSAGE: &str = "Will send a message";
pub const SUCCESS_MESSAGE: &str = "Message sent!";
pub const ERROR_MESSAGE: &str = "Error while sending message";

pub fn block_message(block_id: &BlockId) -> String {
    format!("In block: {block_id}")
}

pub trait Notifier: Send + Sync {
    fn info(&self, message: &str);
    fn success(&self, message: &str);
    fn error(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn info(&self, message: &str) {
        info!(kind = "info", "notification: {message}");
    }

    fn success(&self, message: &str) {
        info!(kind = "success", "notification: {message}");
    }

    fn error(&self, message: &str) {
        error!(kind = "error", "notification: {message}");
    }
}

/// Publishes notifications to every subscribed presenter. Having no
/// subscriber is not an error; the notification is simply dropped.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    fn publish(&self, level: NotificationLevel, message: &str) {
        let _ = self.tx.send(Notification::new(level, message));
    }
}

impl Notifier for BroadcastNotifier {
    fn info(&self, message: &str) {
        self.publish(NotificationLevel::Info, message);
    }

    fn success(&self, message: &str) {
        self.publish(NotificationLevel::Success, message);
    }

    fn error(&self, message: &str) {
        self.publish(NotificationLevel::Error, message);
    }
}

/// Maps lifecycle callbacks onto the user-visible notifications.
pub struct NotifyingCallbacks {
    notifier: Arc<dyn Notifier>,
}

impl NotifyingCallbacks {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl CommandCallbacks for NotifyingCallbacks {
    fn on_load(&self) {
        self.notifier.info(LOAD_MESSAGE);
    }

    fn on_block(&self, block_id: &BlockId) {
        self.notifier.success(&block_message(block_id));
    }

    fn on_success(&self) {
        self.notifier.success(SUCCESS_MESSAGE);
    }

    fn on_error(&self, _reason: &str) {
        self.notifier.error(ERROR_MESSAGE);
    }
}
