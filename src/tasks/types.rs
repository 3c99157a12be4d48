use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::monitoring::{MonitoredEndpoint, RepositoryError};
use crate::notifications::{NotificationError, NotificationPayload};
use crate::queue::{EnqueueOptions, QueueError};

/// Snapshot of an endpoint taken by the scanner when the check was enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPayload {
    pub url_id: i32,
    pub public_id: Uuid,
    pub label: String,
    pub url: String,
    pub interval_seconds: i32,
    pub owner_email: String,
    pub last_checked: Option<DateTime<Utc>>,
}

impl From<&MonitoredEndpoint> for CheckPayload {
    fn from(endpoint: &MonitoredEndpoint) -> Self {
        CheckPayload {
            url_id: endpoint.id,
            public_id: endpoint.public_id,
            label: endpoint.label.clone(),
            url: endpoint.url.clone(),
            interval_seconds: endpoint.interval_seconds,
            owner_email: endpoint.owner_email.clone(),
            last_checked: endpoint.last_checked,
        }
    }
}

/// Every unit of work the queue carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Task {
    CheckUptime(CheckPayload),
    ValidateUptime,
    SendNotification(NotificationPayload),
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::CheckUptime(_) => "check_uptime",
            Task::ValidateUptime => "validate_uptime",
            Task::SendNotification(_) => "send_notification",
        }
    }

    /// Retry and dedup settings applied when the caller does not pass its own.
    pub fn default_options(&self) -> EnqueueOptions {
        match self {
            // A check stays unique while its snapshot is unchanged, so a backlog
            // never piles up duplicate probes of the same endpoint.
            Task::CheckUptime(payload) => EnqueueOptions {
                max_retry: 3,
                delay: Duration::ZERO,
                unique_for: Some(Duration::from_secs(payload.interval_seconds.max(1) as u64)),
            },
            Task::ValidateUptime => EnqueueOptions {
                max_retry: 0,
                delay: Duration::ZERO,
                unique_for: None,
            },
            Task::SendNotification(_) => EnqueueOptions {
                max_retry: 3,
                delay: Duration::ZERO,
                unique_for: None,
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
    #[error("Task cancelled by shutdown")]
    Cancelled,
}

impl TaskError {
    /// Errors that no retry can fix. The worker dead-letters these at once.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TaskError::Notification(NotificationError::MissingRecipient)
        )
    }
}
