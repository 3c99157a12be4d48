use async_trait::async_trait;
use reqwest::{Client, header};
use tera::{Context, Tera};

use super::{NotificationSender, SenderError};
use crate::notifications::models::NotificationPayload;

/// Hands alerts to an HTTP mail relay.
///
/// Without a body template the payload is posted as JSON. With one, the
/// template is rendered with `to`, `subject`, `template`, `data` and every
/// data key at the top level, and posted as the request body.
pub struct WebhookMailSender {
    client: Client,
    url: String,
    body_template: Option<String>,
}

impl WebhookMailSender {
    pub fn new(url: impl Into<String>, body_template: Option<String>) -> Result<Self, SenderError> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|e| {
            SenderError::InvalidConfiguration(format!("Invalid mail webhook URL {url:?}: {e}"))
        })?;
        Ok(Self {
            client: Client::new(),
            url,
            body_template,
        })
    }

    fn render_body(&self, template: &str, payload: &NotificationPayload) -> Result<String, SenderError> {
        let mut tera_context = Context::new();
        for (key, value) in &payload.data {
            tera_context.insert(key, value);
        }
        tera_context.insert("to", &payload.to);
        tera_context.insert("subject", &payload.subject);
        tera_context.insert("template", &payload.template.to_string());
        tera_context.insert("data", &payload.data);

        Tera::one_off(template, &tera_context, false)
            .map_err(|e| SenderError::TemplatingError(e.to_string()))
    }
}

#[async_trait]
impl NotificationSender for WebhookMailSender {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), SenderError> {
        let request_builder = match &self.body_template {
            Some(template) => {
                let rendered_body = self.render_body(template, payload)?;
                self.client
                    .post(&self.url)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(rendered_body)
            }
            None => self.client.post(&self.url).json(payload),
        };

        let response = request_builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Mail webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}
