//! Push delivery through an HTTP push gateway

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::DeliveryError;

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, tokens: &[String], title: &str, body: &str, data: &Value) -> Result<(), DeliveryError>;
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    tokens: &'a [String],
    title: &'a str,
    body: &'a str,
    data: &'a Value,
}

/// Posts `{tokens, title, body, data}` to a gateway that fans out to devices
pub struct HttpPushSender {
    http_client: reqwest::Client,
    gateway_url: Option<String>,
    api_key: Option<String>,
}

impl HttpPushSender {
    pub fn new(gateway_url: Option<String>, api_key: Option<String>) -> Result<Self, DeliveryError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            gateway_url: gateway_url.filter(|u| !u.trim().is_empty()),
            api_key,
        })
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, tokens: &[String], title: &str, body: &str, data: &Value) -> Result<(), DeliveryError> {
        let url = self
            .gateway_url
            .as_deref()
            .ok_or_else(|| DeliveryError::Config("Push gateway is not configured".to_string()))?;
        if tokens.is_empty() {
            return Err(DeliveryError::Config("No device tokens registered".to_string()));
        }

        let mut request = self.http_client.post(url).json(&PushRequest {
            tokens,
            title,
            body,
            data,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(tokens = tokens.len(), "Push accepted by gateway");
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_unconfigured_gateway_is_config_error() {
        let sender = HttpPushSender::new(None, None).unwrap();

        let err = sender
            .send(&["tok".to_string()], "t", "b", &json!({}))
            .await
            .unwrap_err();

        assert_eq!(err, DeliveryError::Config("Push gateway is not configured".to_string()));
    }

    #[tokio::test]
    async fn test_no_tokens_is_config_error() {
        let sender = HttpPushSender::new(Some("http://127.0.0.1:9/push".into()), None).unwrap();

        let err = sender.send(&[], "t", "b", &json!({})).await.unwrap_err();

        assert_eq!(err, DeliveryError::Config("No device tokens registered".to_string()));
    }
}
