//! Drains pending notifications to their channels

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};
use tuutta_common::models::{Channel, Member, NotificationRecord, NotificationStatus};
use tuutta_common::{Datastore, Query, Result};

use super::email::{render_html, EmailSender};
use super::push::PushSender;
use crate::error::{truncate_message, DeliveryError};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

pub const DEFAULT_BATCH_SIZE: usize = 50;

/// How long a claim shields a record before another tick may take it over
pub const DEFAULT_CLAIM_LEASE_MINUTES: i64 = 10;

/// Maximum stored length of a joined channel error
const MAX_ERROR_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records this dispatcher won the claim for
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Datastore,
    email: Arc<dyn EmailSender>,
    push: Arc<dyn PushSender>,
    batch_size: usize,
    claim_lease: Duration,
}

impl NotificationDispatcher {
    pub fn new(store: Datastore, email: Arc<dyn EmailSender>, push: Arc<dyn PushSender>) -> Self {
        Self {
            store,
            email,
            push,
            batch_size: DEFAULT_BATCH_SIZE,
            claim_lease: Duration::minutes(DEFAULT_CLAIM_LEASE_MINUTES),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_claim_lease(mut self, claim_lease: Duration) -> Self {
        self.claim_lease = claim_lease;
        self
    }

    /// Deliver one batch of pending notifications, oldest first
    ///
    /// Each record is claimed before delivery; a record another dispatcher
    /// holds is skipped. A record whose claim is older than the lease was
    /// abandoned mid-delivery and is picked up again.
    pub async fn dispatch_pending(&self) -> Result<DispatchReport> {
        let lease_start = Utc::now() - self.claim_lease;
        let pending: Vec<NotificationRecord> = self
            .store
            .query(
                &Query::all()
                    .eq("status", NotificationStatus::Pending.as_str())
                    .null_or_lt("claimedAt", lease_start)
                    .order_by("createdAt")
                    .insertion_order()
                    .limit(self.batch_size),
            )
            .await?;

        let mut report = DispatchReport::default();

        for record in pending {
            let claim = json!({ "claimedAt": Utc::now().timestamp_millis() });
            if !self
                .store
                .claim::<NotificationRecord>(&record.id, "claimedAt", lease_start, &claim)
                .await?
            {
                debug!(notification_id = %record.id, "Notification claimed elsewhere, skipping");
                continue;
            }
            report.claimed += 1;
            if record.claimed_at.is_some() {
                warn!(
                    tenant_id = %record.tenant_id,
                    notification_id = %record.id,
                    "Reclaimed notification with an expired claim"
                );
            }

            let errors = self.deliver(&record).await;
            if errors.is_empty() {
                self.finish(&record, NotificationStatus::Sent, None).await?;
                report.sent += 1;
            } else {
                let joined = truncate_message(&errors.join("; "), MAX_ERROR_CHARS);
                warn!(
                    tenant_id = %record.tenant_id,
                    notification_id = %record.id,
                    error = %joined,
                    "Notification delivery failed"
                );
                self.finish(&record, NotificationStatus::Failed, Some(joined)).await?;
                report.failed += 1;
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                sent = report.sent,
                failed = report.failed,
                "Notification batch dispatched"
            );
        }
        Ok(report)
    }

    /// Attempt every channel; returns one message per failed channel
    async fn deliver(&self, record: &NotificationRecord) -> Vec<String> {
        let wants_email = record.channels.contains(&Channel::Email);
        let wants_push = record.channels.contains(&Channel::Push);
        if !wants_email && !wants_push {
            // In-app only: the stored record is the delivery
            return Vec::new();
        }

        let member = match self
            .store
            .get::<Member>(&Member::doc_id(&record.tenant_id, &record.recipient_id))
            .await
        {
            Ok(member) => member,
            Err(e) => return vec![format!("recipient lookup: {}", e)],
        };

        let mut errors = Vec::new();

        if wants_email {
            let recipients: Vec<String> = member
                .as_ref()
                .and_then(|m| m.email.clone())
                .into_iter()
                .collect();
            if let Err(e) = self
                .email
                .send(&recipients, &record.title, &render_html(&record.message))
                .await
            {
                errors.push(channel_error(Channel::Email, &e));
            }
        }

        if wants_push {
            let tokens = member.map(|m| m.device_tokens).unwrap_or_default();
            let data = push_data(record);
            if let Err(e) = self.push.send(&tokens, &record.title, &record.message, &data).await {
                errors.push(channel_error(Channel::Push, &e));
            }
        }

        errors
    }

    async fn finish(&self, record: &NotificationRecord, status: NotificationStatus, error: Option<String>) -> Result<()> {
        let mut patch = json!({
            "status": status,
            "attempts": record.attempts + 1,
            "error": error,
        });
        if status == NotificationStatus::Sent {
            patch["sentAt"] = json!(Utc::now().timestamp_millis());
        }

        retry_on_lock("notification terminal status", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.store.merge_update::<NotificationRecord>(&record.id, &patch)
        })
        .await?;
        Ok(())
    }
}

fn channel_error(channel: Channel, error: &DeliveryError) -> String {
    let name = match channel {
        Channel::InApp => "in_app",
        Channel::Email => "email",
        Channel::Push => "push",
    };
    format!("{}: {}", name, error)
}

/// Payload forwarded to devices, tagged with the notification identity
fn push_data(record: &NotificationRecord) -> serde_json::Value {
    let mut data = match &record.payload {
        serde_json::Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    data.insert("notificationId".into(), json!(record.id));
    data.insert("type".into(), json!(record.notification_type));
    serde_json::Value::Object(data)
}
