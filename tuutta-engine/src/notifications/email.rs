//! Email delivery through SendGrid

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::error::DeliveryError;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<(), DeliveryError>;
}

/// SendGrid v3 mail client
///
/// Without an API key every send fails with a configuration error, which the
/// dispatcher records on the notification.
pub struct SendGridEmailSender {
    http_client: reqwest::Client,
    api_key: Option<String>,
    from_address: String,
    from_name: Option<String>,
    endpoint: String,
}

impl SendGridEmailSender {
    pub fn new(
        api_key: Option<String>,
        from_address: String,
        from_name: Option<String>,
    ) -> Result<Self, DeliveryError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| DeliveryError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            from_address,
            from_name,
            endpoint: SENDGRID_SEND_URL.to_string(),
        })
    }

    /// Point at a different API host (tests, regional endpoints)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl EmailSender for SendGridEmailSender {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<(), DeliveryError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| DeliveryError::Config("SENDGRID_API_KEY is not configured".to_string()))?;
        if recipients.is_empty() {
            return Err(DeliveryError::Config("No recipient emails provided".to_string()));
        }

        let to: Vec<_> = recipients.iter().map(|email| json!({ "email": email })).collect();
        let mut from = json!({ "email": self.from_address });
        if let Some(name) = &self.from_name {
            from["name"] = json!(name);
        }
        let body = json!({
            "personalizations": [{ "to": to }],
            "from": from,
            "subject": subject,
            "content": [{ "type": "text/html", "value": html }],
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(recipients = recipients.len(), "Email accepted by SendGrid");
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(DeliveryError::Provider {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Minimal HTML body for a plain-text notification message
pub fn render_html(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;");
    format!("<p>{}</p>", escaped)
}
