use async_trait::async_trait;
use tracing::info;

use super::{NotificationSender, SenderError};
use crate::notifications::models::NotificationPayload;

/// Writes alerts to the log. Used when no mail relay is configured.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), SenderError> {
        info!(
            to = %payload.to,
            subject = %payload.subject,
            template = %payload.template,
            data = ?payload.data,
            "Alert notification (log only)."
        );
        Ok(())
    }
}
