//! Signed webhook fan-out with per-attempt delivery records
//!
//! For a tenant event, every enabled subscription whose allow-list accepts
//! the event gets one POST of the same serialized payload. Subscriptions are
//! processed one after another; each attempt appends a [`WebhookDelivery`]
//! carrying the exact bytes sent, which is what [`WebhookDispatcher::redeliver`]
//! replays.

pub mod client;
pub mod signing;

pub use client::{ReqwestWebhookClient, WebhookClient, DEFAULT_WEBHOOK_TIMEOUT};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use tuutta_common::models::{DeliveryOutcome, WebhookDelivery, WebhookSubscription};
use tuutta_common::{Datastore, Error, Query, Result};

use crate::audit::record_system_error;
use crate::error::{truncate_message, DeliveryError};

pub const SIGNATURE_HEADER: &str = "X-Tuutta-Signature";
pub const EVENT_HEADER: &str = "X-Tuutta-Event";
pub const TIMESTAMP_HEADER: &str = "X-Tuutta-Timestamp";

pub const TEST_EVENT: &str = "webhook.test";

const JOB_NAME: &str = "webhook_dispatch";

/// Canonical body posted to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: String,
    pub tenant_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    store: Datastore,
    client: Arc<dyn WebhookClient>,
}

impl WebhookDispatcher {
    pub fn new(store: Datastore, client: Arc<dyn WebhookClient>) -> Self {
        Self { store, client }
    }

    /// Deliver `event` to every interested subscription of the tenant
    pub async fn dispatch(&self, tenant_id: &str, event: &str, data: Value) -> Result<Vec<WebhookDelivery>> {
        let subscriptions: Vec<WebhookSubscription> = self
            .store
            .query(&Query::tenant(tenant_id).eq("enabled", true).insertion_order())
            .await?;

        let targets: Vec<_> = subscriptions.into_iter().filter(|s| s.accepts(event)).collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let payload = WebhookPayload {
            event: event.to_string(),
            tenant_id: tenant_id.to_string(),
            timestamp: Utc::now(),
            data,
        };
        let body = serde_json::to_string(&payload)?;

        let mut deliveries = Vec::with_capacity(targets.len());
        for subscription in &targets {
            let delivery = self.attempt(subscription, event, payload.timestamp, &body, 1).await?;
            deliveries.push(delivery);
        }

        info!(
            tenant_id,
            event,
            subscriptions = deliveries.len(),
            succeeded = deliveries.iter().filter(|d| d.outcome == DeliveryOutcome::Success).count(),
            "Webhook event dispatched"
        );
        Ok(deliveries)
    }

    /// Send a stored delivery's payload again, byte for byte
    ///
    /// Appends a new delivery row with the next attempt number.
    pub async fn redeliver(&self, delivery_id: &str) -> Result<WebhookDelivery> {
        let previous: WebhookDelivery = self
            .store
            .get(delivery_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Webhook delivery {}", delivery_id)))?;

        let subscription: WebhookSubscription = self
            .store
            .get(&previous.subscription_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Webhook subscription {}", previous.subscription_id)))?;
        if !subscription.enabled {
            return Err(Error::InvalidInput(format!(
                "Webhook subscription {} is disabled",
                subscription.id
            )));
        }

        let stored: WebhookPayload = serde_json::from_str(&previous.payload)?;

        self.attempt(
            &subscription,
            &previous.event,
            stored.timestamp,
            &previous.payload,
            previous.attempt + 1,
        )
        .await
    }

    /// Dispatch a `webhook.test` event so a tenant can check their endpoints
    pub async fn send_test(&self, tenant_id: &str) -> Result<Vec<WebhookDelivery>> {
        self.dispatch(
            tenant_id,
            TEST_EVENT,
            json!({ "message": "This is a test webhook from Tuutta." }),
        )
        .await
    }

    async fn attempt(
        &self,
        subscription: &WebhookSubscription,
        event: &str,
        timestamp: DateTime<Utc>,
        body: &str,
        attempt: u32,
    ) -> Result<WebhookDelivery> {
        let result = match build_headers(subscription, event, timestamp, body.as_bytes()) {
            Ok(headers) => self.client.post(&subscription.url, &headers, body.as_bytes()).await,
            Err(e) => Err(e),
        };

        let (outcome, http_status, error) = match result {
            Ok(status) if (200..300).contains(&status) => (DeliveryOutcome::Success, Some(status), None),
            Ok(status) => (DeliveryOutcome::Failed, Some(status), Some(format!("HTTP {}", status))),
            Err(e) => {
                let message = truncate_message(&e.to_string(), 500);
                record_system_error(
                    &self.store,
                    &subscription.tenant_id,
                    JOB_NAME,
                    message.clone(),
                    json!({
                        "subscriptionId": subscription.id,
                        "event": event,
                        "attempt": attempt,
                    }),
                )
                .await;
                (DeliveryOutcome::Failed, None, Some(message))
            }
        };

        if outcome == DeliveryOutcome::Failed {
            warn!(
                tenant_id = %subscription.tenant_id,
                subscription_id = %subscription.id,
                event,
                attempt,
                error = error.as_deref().unwrap_or_default(),
                "Webhook delivery failed"
            );
        }

        let delivery = WebhookDelivery {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: subscription.tenant_id.clone(),
            subscription_id: subscription.id.clone(),
            event: event.to_string(),
            outcome,
            http_status,
            error,
            attempt,
            payload: body.to_string(),
            attempted_at: Utc::now(),
        };
        self.store.create(&delivery).await?;
        Ok(delivery)
    }
}

/// Event, timestamp and optional signature headers, then the
/// subscription's own headers
fn build_headers(
    subscription: &WebhookSubscription,
    event: &str,
    timestamp: DateTime<Utc>,
    body: &[u8],
) -> std::result::Result<Vec<(String, String)>, DeliveryError> {
    let mut headers = vec![
        (EVENT_HEADER.to_string(), event.to_string()),
        (TIMESTAMP_HEADER.to_string(), timestamp.timestamp_millis().to_string()),
    ];
    if let Some(secret) = subscription.secret.as_deref().filter(|s| !s.is_empty()) {
        headers.push((SIGNATURE_HEADER.to_string(), signing::sign(secret, body)?));
    }
    for (name, value) in &subscription.headers {
        headers.push((name.clone(), value.clone()));
    }
    Ok(headers)
}
