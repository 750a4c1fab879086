use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

/// Tenant-registered HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    pub id: String,
    pub tenant_id: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    pub enabled: bool,
    /// Allow-list of event names; absent or empty means every event
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl WebhookSubscription {
    pub fn accepts(&self, event: &str) -> bool {
        match &self.events {
            Some(events) if !events.is_empty() => events.iter().any(|e| e == event),
            _ => true,
        }
    }
}

impl Document for WebhookSubscription {
    const COLLECTION: &'static str = "webhook_subscriptions";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Success,
    Failed,
}

/// One delivery attempt; append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDelivery {
    pub id: String,
    pub tenant_id: String,
    pub subscription_id: String,
    pub event: String,
    pub outcome: DeliveryOutcome,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
    pub attempt: u32,
    /// Exact body that was posted
    pub payload: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub attempted_at: DateTime<Utc>,
}

impl Document for WebhookDelivery {
    const COLLECTION: &'static str = "webhook_deliveries";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
