//! Domain events, the persisted outbox and the in-process EventBus
//!
//! Every accepted mutation on the guarded write path appends an
//! [`OutboxEvent`]. The outbox is the source of truth: the fan-out router
//! drains it in insertion order. The [`EventBus`] only carries a copy of the
//! event so that listeners (the router, tests) can react without waiting for
//! the next poll.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::db::Document;
use crate::models::{CertificateKind, EnrollmentStatus};

/// State change announced to downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    EnrollmentCreated {
        tenant_id: String,
        enrollment_id: String,
        learner_id: String,
        course_id: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    /// Status moved forward (the guard never lets a regression through)
    EnrollmentStatusChanged {
        tenant_id: String,
        enrollment_id: String,
        learner_id: String,
        course_id: String,
        before: EnrollmentStatus,
        after: EnrollmentStatus,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    AssessmentRecorded {
        tenant_id: String,
        assessment_result_id: String,
        enrollment_id: String,
        learner_id: String,
        score: f64,
        passed: bool,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },

    CertificateIssued {
        tenant_id: String,
        certificate_id: String,
        learner_id: String,
        kind: CertificateKind,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn tenant_id(&self) -> &str {
        match self {
            DomainEvent::EnrollmentCreated { tenant_id, .. }
            | DomainEvent::EnrollmentStatusChanged { tenant_id, .. }
            | DomainEvent::AssessmentRecorded { tenant_id, .. }
            | DomainEvent::CertificateIssued { tenant_id, .. } => tenant_id,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::EnrollmentCreated { .. } => "enrollment_created",
            DomainEvent::EnrollmentStatusChanged { .. } => "enrollment_status_changed",
            DomainEvent::AssessmentRecorded { .. } => "assessment_recorded",
            DomainEvent::CertificateIssued { .. } => "certificate_issued",
        }
    }

    /// Webhook event name, if subscribers hear about this event at all
    pub fn webhook_event(&self) -> Option<&'static str> {
        match self {
            DomainEvent::EnrollmentCreated { .. } => Some("enrollment.created"),
            DomainEvent::EnrollmentStatusChanged { after, .. } => match after {
                EnrollmentStatus::Completed => Some("enrollment.completed"),
                EnrollmentStatus::Overdue => Some("enrollment.overdue"),
                _ => None,
            },
            DomainEvent::AssessmentRecorded { .. } => Some("assessment.submitted"),
            DomainEvent::CertificateIssued { .. } => Some("certificate.issued"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }
}

/// Persisted domain event awaiting fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: String,
    pub tenant_id: String,
    pub event: DomainEvent,
    pub status: OutboxStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: event.tenant_id().to_string(),
            event,
            status: OutboxStatus::Pending,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

impl Document for OutboxEvent {
    const COLLECTION: &'static str = "outbox_events";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

/// In-process broadcast of domain events
///
/// Lossy by nature: a lagging or absent subscriber misses events, which is
/// fine because the outbox still holds them.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    ///
    /// # Examples
    ///
    /// ```
    /// use tuutta_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DomainEvent) -> Result<usize, broadcast::error::SendError<DomainEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_changed(after: EnrollmentStatus) -> DomainEvent {
        DomainEvent::EnrollmentStatusChanged {
            tenant_id: "t1".to_string(),
            enrollment_id: "e1".to_string(),
            learner_id: "u1".to_string(),
            course_id: "c1".to_string(),
            before: EnrollmentStatus::InProgress,
            after,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_webhook_event_names() {
        assert_eq!(
            status_changed(EnrollmentStatus::Completed).webhook_event(),
            Some("enrollment.completed")
        );
        assert_eq!(
            status_changed(EnrollmentStatus::Overdue).webhook_event(),
            Some("enrollment.overdue")
        );
        assert_eq!(status_changed(EnrollmentStatus::Failed).webhook_event(), None);
    }

    #[test]
    fn test_event_serializes_tagged_camel_case() {
        let value = serde_json::to_value(status_changed(EnrollmentStatus::Completed)).unwrap();
        assert_eq!(value["type"], "enrollment_status_changed");
        assert_eq!(value["enrollmentId"], "e1");
        assert_eq!(value["after"], "completed");

        let parsed: DomainEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.tenant_id(), "t1");
    }

    #[test]
    fn test_outbox_event_inherits_tenant() {
        let outbox = OutboxEvent::new(status_changed(EnrollmentStatus::Completed));
        assert_eq!(outbox.tenant_id, "t1");
        assert_eq!(outbox.status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let event = status_changed(EnrollmentStatus::Completed);
        assert_eq!(bus.emit(event.clone()).unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus.emit(status_changed(EnrollmentStatus::Overdue)).is_err());
        bus.emit_lossy(status_changed(EnrollmentStatus::Overdue));
    }
}
