use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::models::NotificationPayload;
use super::senders::{NotificationSender, SenderError, log::LogSender, webhook::WebhookMailSender};

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Sender error: {0}")]
    SenderError(#[from] SenderError),
    #[error("Notification has no recipient")]
    MissingRecipient,
}

/// Delivers alert payloads through the configured sender.
pub struct NotificationService {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationService {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    /// Picks the mail relay when a webhook URL is configured, the log sender otherwise.
    pub fn from_config(
        mail_webhook_url: Option<&str>,
        body_template: Option<String>,
    ) -> Result<Self, NotificationError> {
        let sender: Arc<dyn NotificationSender> = match mail_webhook_url {
            Some(url) => Arc::new(WebhookMailSender::new(url, body_template)?),
            None => {
                info!("No mail webhook configured. Alerts will only be logged.");
                Arc::new(LogSender)
            }
        };
        Ok(Self::new(sender))
    }

    /// Sends one alert. Errors are returned to the caller so the queue can retry.
    pub async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotificationError> {
        if payload.to.trim().is_empty() {
            return Err(NotificationError::MissingRecipient);
        }
        self.sender.send(payload).await?;
        info!(to = %payload.to, template = %payload.template, "Notification delivered.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::models::TemplateId;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<NotificationPayload>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        async fn send(&self, payload: &NotificationPayload) -> Result<(), SenderError> {
            if self.fail {
                return Err(SenderError::SendFailed("relay down".to_string()));
            }
            self.sent.lock().await.push(payload.clone());
            Ok(())
        }
    }

    fn payload(to: &str) -> NotificationPayload {
        NotificationPayload {
            to: to.to_string(),
            subject: TemplateId::Up.subject().to_string(),
            template: TemplateId::Up,
            data: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_deliver_uses_sender() {
        let sender = Arc::new(RecordingSender::default());
        let service = NotificationService::new(sender.clone());

        service.deliver(&payload("owner@example.com")).await.unwrap();

        assert_eq!(sender.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_propagates_sender_failure() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let service = NotificationService::new(sender);

        let result = service.deliver(&payload("owner@example.com")).await;
        assert!(matches!(result, Err(NotificationError::SenderError(_))));
    }

    #[tokio::test]
    async fn test_deliver_rejects_empty_recipient() {
        let service = NotificationService::new(Arc::new(RecordingSender::default()));
        assert!(matches!(
            service.deliver(&payload("  ")).await,
            Err(NotificationError::MissingRecipient)
        ));
    }

    #[tokio::test]
    async fn test_from_config_without_webhook_logs_only() {
        let service = NotificationService::from_config(None, None).unwrap();
        service.deliver(&payload("owner@example.com")).await.unwrap();
    }
}
