//! Outbox Fan-out Integration Tests
//! Test File: fanout_tests.rs
//!
//! Drives the guarded write path and drains the outbox to check the side
//! effects each domain event produces.

mod common;

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tuutta_common::events::{DomainEvent, OutboxEvent, OutboxStatus};
use tuutta_common::models::{
    AuditLogEntry, Certificate, CertificateKind, EnrollmentStatus, NotificationRecord, NotificationSettings,
    SystemError,
};
use tuutta_common::Query;
use tuutta_engine::documents::EnrollmentUpdate;

use common::{course, enrollment, harness, member, subscription, tenant, Harness, TENANT};

async fn seed(h: &Harness) {
    let settings = NotificationSettings {
        email_enabled: true,
        ..NotificationSettings::default()
    };
    h.store().create(&tenant(settings)).await.unwrap();
    h.store().create(&course("c1", "Anti-Bribery")).await.unwrap();
    h.store().create(&member("u1", Some("u1@acme.test"))).await.unwrap();
    h.store().create(&subscription("s1", None, Some("k"))).await.unwrap();
}

async fn notifications_of(h: &Harness, kind: &str) -> Vec<NotificationRecord> {
    h.store()
        .query(&Query::tenant(TENANT).eq("notificationType", kind))
        .await
        .unwrap()
}

/// TC-FAN-001: New enrollment is audited, announced and notified
/// **Type:** Integration Test | **Priority:** P0
#[tokio::test]
async fn tc_fan_001_enrollment_created() {
    // Given: A tenant with email enabled and an open webhook
    let h = harness().await;
    seed(&h).await;

    // When: An enrollment is created and the outbox drained
    h.engine
        .documents
        .create_enrollment(enrollment("e1", "u1", "c1", Utc::now()))
        .await
        .unwrap();
    let report = h.engine.fanout.drain(100).await.unwrap();

    // Then: One event processed with all three side effects
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);

    let audits: Vec<AuditLogEntry> = h
        .store()
        .query(&Query::tenant(TENANT).eq("action", "enrollment.created"))
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);

    let created = notifications_of(&h, "enrollment_created").await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].recipient_id, "u1");
    assert_eq!(created[0].message, "You have been enrolled in \"Anti-Bribery\".");
    assert!(created[0].channels.contains(&tuutta_common::models::Channel::Email));

    let posted = h.webhook.posted();
    assert_eq!(posted.len(), 1);
    let body = posted[0].json();
    assert_eq!(body["event"], "enrollment.created");
    assert_eq!(body["data"]["enrollmentId"], "e1");
    assert_eq!(body["data"]["userId"], "u1");
    assert_eq!(body["data"]["courseId"], "c1");
}

/// TC-FAN-002: Completion leads to a certificate, notifications and webhooks
/// **Type:** Integration Test | **Priority:** P0
#[tokio::test]
async fn tc_fan_002_completion_flow() {
    let h = harness().await;
    seed(&h).await;
    let docs = &h.engine.documents;
    docs.create_enrollment(enrollment("e1", "u1", "c1", Utc::now()))
        .await
        .unwrap();
    docs.update_enrollment("e1", EnrollmentUpdate::status(EnrollmentStatus::Completed))
        .await
        .unwrap();

    // When: The outbox is drained until empty
    let mut processed = 0;
    loop {
        let report = h.engine.fanout.drain(100).await.unwrap();
        if report.processed == 0 {
            break;
        }
        processed += report.processed;
    }

    // Then: created, status-changed and certificate events all handled
    assert_eq!(processed, 3);

    let certificate: Certificate = h
        .store()
        .get(&Certificate::course_doc_id(TENANT, "e1"))
        .await
        .unwrap()
        .expect("certificate issued");
    assert_eq!(certificate.kind, CertificateKind::Course);

    assert_eq!(notifications_of(&h, "course_completed").await.len(), 1);
    let issued = notifications_of(&h, "certificate_issued").await;
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].message, "Your certificate for \"Anti-Bribery\" is ready.");

    assert_eq!(
        h.webhook.events(),
        vec![
            "enrollment.created".to_string(),
            "enrollment.completed".to_string(),
            "certificate.issued".to_string(),
        ]
    );
    let cert_hook = h.webhook.posted()[2].json();
    assert_eq!(cert_hook["data"]["certificateNumber"], certificate.certificate_number.as_str());
    assert_eq!(cert_hook["data"]["verificationUrl"], certificate.verification_url.as_str());

    let remaining = h.engine.outbox.pending(100).await.unwrap();
    assert!(remaining.is_empty());
}

/// TC-FAN-003: Status changes without a webhook name are quiet
/// **Type:** Integration Test | **Priority:** P2
#[tokio::test]
async fn tc_fan_003_in_progress_has_no_webhook() {
    let h = harness().await;
    seed(&h).await;
    let docs = &h.engine.documents;
    docs.create_enrollment(enrollment("e1", "u1", "c1", Utc::now()))
        .await
        .unwrap();
    h.engine.fanout.drain(100).await.unwrap();

    docs.update_enrollment("e1", EnrollmentUpdate::status(EnrollmentStatus::InProgress))
        .await
        .unwrap();
    let report = h.engine.fanout.drain(100).await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(h.webhook.posted().len(), 1);
}

/// TC-FAN-004: A failing event does not block the ones after it
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_fan_004_failure_is_isolated() {
    // Given: A certificate row that cannot be decoded
    let h = harness().await;
    seed(&h).await;
    sqlx::query(
        "INSERT INTO documents (collection, id, tenant_id, body, created_at, updated_at) \
         VALUES ('certificates', 'broken', ?, '{\"id\":\"broken\"}', 0, 0)",
    )
    .bind(TENANT)
    .execute(h.store().pool())
    .await
    .unwrap();

    // And: An event pointing at it, followed by a healthy event
    h.engine
        .outbox
        .append(DomainEvent::CertificateIssued {
            tenant_id: TENANT.to_string(),
            certificate_id: "broken".to_string(),
            learner_id: "u1".to_string(),
            kind: CertificateKind::Course,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    h.engine
        .documents
        .create_enrollment(enrollment("e1", "u1", "c1", Utc::now()))
        .await
        .unwrap();

    // When: The outbox is drained
    let report = h.engine.fanout.drain(100).await.unwrap();

    // Then: First fails, second is processed
    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 1);

    let events: Vec<OutboxEvent> = h.store().query(&Query::all().insertion_order()).await.unwrap();
    assert_eq!(events[0].status, OutboxStatus::Failed);
    assert!(events[0].error.is_some());
    assert_eq!(events[1].status, OutboxStatus::Processed);

    let errors: Vec<SystemError> = h.store().query(&Query::tenant(TENANT)).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].job, "outbox_fanout");
    assert_eq!(errors[0].context["kind"], "certificate_issued");
    assert_eq!(errors[0].context["step"], "certificate_lookup");

    // And: The failed lookup did not stop the notification or the webhook
    assert_eq!(notifications_of(&h, "certificate_issued").await.len(), 1);
    assert!(h.webhook.events().contains(&"certificate.issued".to_string()));
}

/// TC-FAN-005: Background loop reacts to new events and stops on cancel
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_fan_005_run_loop_processes_and_stops() {
    // Given: The router running in the background
    let h = harness().await;
    seed(&h).await;
    let cancel = CancellationToken::new();
    let fanout = h.engine.fanout.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { fanout.run(token, Duration::from_secs(3600)).await });

    // When: An enrollment is created
    h.engine
        .documents
        .create_enrollment(enrollment("e1", "u1", "c1", Utc::now()))
        .await
        .unwrap();

    // Then: The event is processed without waiting for the ticker
    let mut drained = false;
    for _ in 0..100 {
        if h.engine.outbox.pending(10).await.unwrap().is_empty() {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(drained, "outbox should be drained by the running router");
    assert_eq!(notifications_of(&h, "enrollment_created").await.len(), 1);

    // And: Cancellation ends the loop
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("router stops after cancel")
        .unwrap();
}

/// TC-FAN-006: A failed certificate issuance still announces the completion
/// **Type:** Integration Test | **Priority:** P0
#[tokio::test]
async fn tc_fan_006_issuance_failure_keeps_other_side_effects() {
    // Given: A created enrollment, and an assessment row for it that cannot be decoded
    let h = harness().await;
    seed(&h).await;
    let docs = &h.engine.documents;
    docs.create_enrollment(enrollment("e1", "u1", "c1", Utc::now()))
        .await
        .unwrap();
    h.engine.fanout.drain(100).await.unwrap();
    sqlx::query(
        "INSERT INTO documents (collection, id, tenant_id, body, created_at, updated_at) \
         VALUES ('assessment_results', 'broken', ?, '{\"id\":\"broken\",\"enrollmentId\":\"e1\"}', 0, 0)",
    )
    .bind(TENANT)
    .execute(h.store().pool())
    .await
    .unwrap();

    // When: The enrollment completes and the outbox is drained
    docs.update_enrollment("e1", EnrollmentUpdate::status(EnrollmentStatus::Completed))
        .await
        .unwrap();
    let report = h.engine.fanout.drain(100).await.unwrap();

    // Then: The event is failed, but only the certificate step is missing
    assert_eq!(report.failed, 1);
    assert!(h
        .store()
        .get::<Certificate>(&Certificate::course_doc_id(TENANT, "e1"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(notifications_of(&h, "course_completed").await.len(), 1);
    assert_eq!(
        h.webhook.events(),
        vec!["enrollment.created".to_string(), "enrollment.completed".to_string()]
    );

    let audits: Vec<AuditLogEntry> = h
        .store()
        .query(&Query::tenant(TENANT).eq("action", "enrollment.completed"))
        .await
        .unwrap();
    assert_eq!(audits.len(), 1);

    // And: One system error names the failed step
    let errors: Vec<SystemError> = h.store().query(&Query::tenant(TENANT)).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].context["step"], "certificate");
    assert_eq!(errors[0].context["kind"], "enrollment_status_changed");

    let events: Vec<OutboxEvent> = h.store().query(&Query::all().insertion_order()).await.unwrap();
    let failed = events.iter().find(|e| e.status == OutboxStatus::Failed).unwrap();
    assert!(failed.error.as_deref().unwrap().starts_with("certificate: "));
}
