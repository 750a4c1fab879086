//! User notifications: queueing and delivery
//!
//! Any component may queue a notification; only the
//! [`dispatcher::NotificationDispatcher`] moves a record out of `pending`.

pub mod dispatcher;
pub mod email;
pub mod push;

pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use email::{EmailSender, SendGridEmailSender};
pub use push::{HttpPushSender, PushSender};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::debug;
use tuutta_common::models::{Channel, NotificationRecord, NotificationStatus};
use tuutta_common::{Datastore, Query, Result};

/// Repeats with the same dedupe key inside this window are suppressed
pub const DEDUPE_WINDOW_HOURS: i64 = 24;

/// Notification to be queued
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub tenant_id: String,
    pub recipient_id: String,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub payload: Value,
    pub channels: Vec<Channel>,
    /// Entity the notification is about; part of the dedupe key
    pub entity_id: Option<String>,
}

impl NewNotification {
    pub fn new(
        tenant_id: &str,
        recipient_id: &str,
        notification_type: &str,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            recipient_id: recipient_id.to_string(),
            notification_type: notification_type.to_string(),
            title: title.into(),
            message: message.into(),
            payload: Value::Object(Default::default()),
            channels: vec![Channel::InApp],
            entity_id: None,
        }
    }

    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn about(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    /// `tenant:user:type:entity`
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.tenant_id,
            self.recipient_id,
            self.notification_type,
            self.entity_id.as_deref().unwrap_or("-")
        )
    }

    fn into_record(self, now: DateTime<Utc>) -> NotificationRecord {
        let dedupe_key = self.dedupe_key();
        NotificationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: self.tenant_id,
            recipient_id: self.recipient_id,
            notification_type: self.notification_type,
            title: self.title,
            message: self.message,
            payload: self.payload,
            channels: self.channels,
            status: NotificationStatus::Pending,
            error: None,
            attempts: 0,
            dedupe_key: Some(dedupe_key),
            created_at: now,
            claimed_at: None,
            sent_at: None,
        }
    }
}

/// Queue a notification unconditionally
pub async fn enqueue_notification(store: &Datastore, notification: NewNotification) -> Result<NotificationRecord> {
    let record = notification.into_record(Utc::now());
    store.create(&record).await?;

    debug!(
        tenant_id = %record.tenant_id,
        recipient_id = %record.recipient_id,
        notification_type = %record.notification_type,
        "Notification queued"
    );
    Ok(record)
}

/// Queue a notification unless an identical one was queued within the window
///
/// Returns `None` when suppressed.
pub async fn enqueue_unique(
    store: &Datastore,
    notification: NewNotification,
    now: DateTime<Utc>,
) -> Result<Option<NotificationRecord>> {
    let key = notification.dedupe_key();
    let window_start = now - Duration::hours(DEDUPE_WINDOW_HOURS);

    let recent = store
        .count::<NotificationRecord>(
            &Query::tenant(&notification.tenant_id)
                .eq("dedupeKey", key.as_str())
                .gt("createdAt", window_start),
        )
        .await?;

    if recent > 0 {
        debug!(dedupe_key = %key, "Duplicate notification suppressed");
        return Ok(None);
    }

    let record = notification.into_record(now);
    store.create(&record).await?;
    Ok(Some(record))
}
