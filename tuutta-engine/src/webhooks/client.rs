//! Outbound HTTP for webhook deliveries

use async_trait::async_trait;
use std::time::Duration;

use crate::error::DeliveryError;

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Single POST; returns the response status whatever it is
///
/// Only failures to get a response at all are errors.
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn post(&self, url: &str, headers: &[(String, String)], body: &[u8]) -> Result<u16, DeliveryError>;
}

pub struct ReqwestWebhookClient {
    http_client: reqwest::Client,
}

impl ReqwestWebhookClient {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn post(&self, url: &str, headers: &[(String, String)], body: &[u8]) -> Result<u16, DeliveryError> {
        let mut request = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        Ok(response.status().as_u16())
    }
}
