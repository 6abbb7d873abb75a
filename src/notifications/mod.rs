//! Progress notifications and index refresh signals sent to users.
//!
//! Delivery is always best-effort from the pipeline's point of view: a failed
//! or dropped notification never changes the outcome of a run.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Channel capacity for `ChannelNotifier`.
/// Events are silently dropped when the channel is full (the pipeline uses try_send).
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// A user-facing progress message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }
}

/// Events emitted by `ChannelNotifier`.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    /// The user's schema changed; index/discovery views should be rebuilt.
    RefreshIndex { user_id: String },
    Progress {
        user_id: String,
        notification: Notification,
    },
}

/// Convenience type alias for the notification sender half.
pub type NotificationSender = mpsc::Sender<NotificationEvent>;

#[async_trait]
pub trait Notifier: Debug + Send + Sync {
    /// Ask the index/discovery service to refresh its view of a user's schema.
    async fn refresh_index(&self, user_id: &str) -> Result<()>;

    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn refresh_index(&self, user_id: &str) -> Result<()> {
        info!(user_id = %user_id, "Index refresh requested");
        Ok(())
    }

    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<()> {
        match notification.level {
            NotificationLevel::Error => {
                error!(user_id = %user_id, message = %notification.message, "Notification")
            }
            _ => info!(
                user_id = %user_id,
                level = ?notification.level,
                message = %notification.message,
                "Notification"
            ),
        }
        Ok(())
    }
}

/// Forwards notifications to a bounded channel for a delivery task to drain.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: NotificationSender,
}

impl ChannelNotifier {
    pub fn new(sender: NotificationSender) -> Self {
        Self { sender }
    }

    /// Create a notifier together with the receiving half of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }

    fn send(&self, event: NotificationEvent) -> Result<()> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(?event, "Notification channel full, dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                anyhow::bail!("Notification channel closed")
            }
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn refresh_index(&self, user_id: &str) -> Result<()> {
        self.send(NotificationEvent::RefreshIndex {
            user_id: user_id.to_string(),
        })
    }

    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<()> {
        self.send(NotificationEvent::Progress {
            user_id: user_id.to_string(),
            notification: notification.clone(),
        })
    }
}
