use async_trait::async_trait;
use thiserror::Error;

use super::models::NotificationPayload;

pub mod log;
pub mod webhook;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Templating error: {0}")]
    TemplatingError(String),
}

/// A trait for delivering an alert to its recipient.
/// All concrete sender implementations (e.g., mail relay webhook, log) must implement this trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), SenderError>;
}
