//! Outbox consumer routing domain events to their side effects
//!
//! Events are handled in insertion order. Each side effect of an event
//! (audit entry, notification, certificate issuance, webhook) is attempted
//! independently: a failing step records a system error and the remaining
//! steps still run. An event with any failed step is marked `failed` once
//! every step has been attempted, and draining continues with the next one.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tuutta_common::events::DomainEvent;
use tuutta_common::models::{
    AuditLogEntry, Certificate, CertificateKind, Channel, Course, EnrollmentStatus, LearningPath, Tenant,
};
use tuutta_common::{Datastore, Result};

use crate::audit::{record_audit, record_system_error};
use crate::certificates::CertificateIssuer;
use crate::notifications::{enqueue_unique, NewNotification};
use crate::outbox::Outbox;
use crate::webhooks::WebhookDispatcher;

pub const DEFAULT_DRAIN_LIMIT: usize = 100;

const JOB_NAME: &str = "outbox_fanout";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub processed: usize,
    pub failed: usize,
}

/// Side effect of one event that did not happen
#[derive(Debug)]
struct StepFailure {
    step: &'static str,
    message: String,
}

/// Collects step outcomes for one event
#[derive(Debug, Default)]
struct Steps {
    failures: Vec<StepFailure>,
}

impl Steps {
    fn check<T>(&mut self, step: &'static str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.failures.push(StepFailure {
                    step,
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

#[derive(Clone)]
pub struct FanoutRouter {
    store: Datastore,
    outbox: Outbox,
    certificates: CertificateIssuer,
    webhooks: WebhookDispatcher,
}

impl FanoutRouter {
    pub fn new(
        store: Datastore,
        outbox: Outbox,
        certificates: CertificateIssuer,
        webhooks: WebhookDispatcher,
    ) -> Self {
        Self {
            store,
            outbox,
            certificates,
            webhooks,
        }
    }

    /// Process up to `limit` pending outbox events
    pub async fn drain(&self, limit: usize) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        for record in self.outbox.pending(limit).await? {
            let failures = self.handle(&record.event).await;
            if failures.is_empty() {
                self.outbox.mark_processed(&record.id).await?;
                report.processed += 1;
                continue;
            }

            for failure in &failures {
                record_system_error(
                    &self.store,
                    &record.tenant_id,
                    JOB_NAME,
                    failure.message.clone(),
                    json!({
                        "outboxId": record.id,
                        "kind": record.event.kind(),
                        "step": failure.step,
                    }),
                )
                .await;
            }
            self.outbox.mark_failed(&record.id, &summarize(&failures)).await?;
            report.failed += 1;
        }

        if report.processed + report.failed > 0 {
            debug!(processed = report.processed, failed = report.failed, "Outbox drained");
        }
        Ok(report)
    }

    /// Drain until cancelled, waking on new events or every `interval`
    pub async fn run(&self, cancel: CancellationToken, interval: Duration) {
        let mut events = self.outbox.event_bus().subscribe();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs = interval.as_secs(), "Outbox fan-out started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                // Lagged or not, the outbox holds whatever was missed
                _ = events.recv() => {}
            }

            loop {
                match self.drain(DEFAULT_DRAIN_LIMIT).await {
                    Ok(report) if report.processed + report.failed == DEFAULT_DRAIN_LIMIT => continue,
                    Ok(_) => break,
                    Err(e) => {
                        warn!(error = %e, "Outbox drain failed");
                        break;
                    }
                }
            }
        }

        info!("Outbox fan-out stopped");
    }

    /// Run every side effect of `event`; returns the steps that failed
    async fn handle(&self, event: &DomainEvent) -> Vec<StepFailure> {
        let mut steps = Steps::default();

        match event {
            DomainEvent::EnrollmentCreated {
                tenant_id,
                enrollment_id,
                learner_id,
                course_id,
                ..
            } => {
                let audit = AuditLogEntry::system(
                    tenant_id,
                    "enrollment.created",
                    "enrollment",
                    enrollment_id,
                    json!({ "learnerId": learner_id, "courseId": course_id }),
                );
                steps.check("audit", record_audit(&self.store, &audit).await);

                let notified = async {
                    let title = self.course_title(course_id).await?;
                    self.notify(
                        tenant_id,
                        learner_id,
                        "enrollment_created",
                        "New training assigned",
                        format!("You have been enrolled in \"{}\".", title),
                        enrollment_id,
                        json!({ "enrollmentId": enrollment_id, "courseId": course_id }),
                    )
                    .await
                }
                .await;
                steps.check("notification", notified);

                let data = enrollment_payload(enrollment_id, learner_id, course_id);
                steps.check("webhook", self.webhook(event, data).await);
            }

            DomainEvent::EnrollmentStatusChanged {
                tenant_id,
                enrollment_id,
                learner_id,
                course_id,
                before,
                after,
                ..
            } => {
                if *after == EnrollmentStatus::Completed {
                    let audit = AuditLogEntry::system(
                        tenant_id,
                        "enrollment.completed",
                        "enrollment",
                        enrollment_id,
                        json!({ "before": before, "after": after }),
                    );
                    steps.check("audit", record_audit(&self.store, &audit).await);

                    let notified = async {
                        let title = self.course_title(course_id).await?;
                        self.notify(
                            tenant_id,
                            learner_id,
                            "course_completed",
                            "Course completed",
                            format!("You completed \"{}\".", title),
                            enrollment_id,
                            json!({ "enrollmentId": enrollment_id, "courseId": course_id }),
                        )
                        .await
                    }
                    .await;
                    steps.check("notification", notified);

                    steps.check(
                        "certificate",
                        self.certificates.on_enrollment_completed(enrollment_id).await,
                    );
                }

                let data = enrollment_payload(enrollment_id, learner_id, course_id);
                steps.check("webhook", self.webhook(event, data).await);
            }

            DomainEvent::AssessmentRecorded {
                assessment_result_id,
                enrollment_id,
                learner_id,
                score,
                passed,
                ..
            } => {
                let data = json!({
                    "assessmentResultId": assessment_result_id,
                    "enrollmentId": enrollment_id,
                    "userId": learner_id,
                    "score": score,
                    "passed": passed,
                });
                steps.check("webhook", self.webhook(event, data).await);
            }

            DomainEvent::CertificateIssued {
                tenant_id,
                certificate_id,
                learner_id,
                kind,
                ..
            } => {
                // Without the stored certificate both steps fall back to the event fields
                let certificate = steps
                    .check("certificate_lookup", self.store.get::<Certificate>(certificate_id).await)
                    .flatten();

                let notified = async {
                    let message = self.certificate_message(*kind, certificate.as_ref()).await?;
                    self.notify(
                        tenant_id,
                        learner_id,
                        "certificate_issued",
                        "Certificate issued",
                        message,
                        certificate_id,
                        json!({ "certificateId": certificate_id, "kind": kind }),
                    )
                    .await
                }
                .await;
                steps.check("notification", notified);

                let mut data = json!({
                    "certificateId": certificate_id,
                    "userId": learner_id,
                    "kind": kind,
                });
                if let Some(certificate) = &certificate {
                    data["certificateNumber"] = json!(certificate.certificate_number);
                    data["verificationUrl"] = json!(certificate.verification_url);
                    data["courseId"] = json!(certificate.course_id);
                    data["learningPathId"] = json!(certificate.learning_path_id);
                }
                steps.check("webhook", self.webhook(event, data).await);
            }
        }

        steps.failures
    }

    async fn webhook(&self, event: &DomainEvent, data: Value) -> Result<()> {
        if let Some(name) = event.webhook_event() {
            self.webhooks.dispatch(event.tenant_id(), name, data).await?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn notify(
        &self,
        tenant_id: &str,
        recipient_id: &str,
        notification_type: &str,
        title: &str,
        message: String,
        entity_id: &str,
        payload: Value,
    ) -> Result<()> {
        let channels = self.channels(tenant_id).await?;
        let notification = NewNotification::new(tenant_id, recipient_id, notification_type, title, message)
            .with_channels(channels)
            .with_payload(payload)
            .about(entity_id);
        enqueue_unique(&self.store, notification, Utc::now()).await?;
        Ok(())
    }

    async fn channels(&self, tenant_id: &str) -> Result<Vec<Channel>> {
        let tenant: Option<Tenant> = self.store.get(tenant_id).await?;
        Ok(tenant.map(|t| t.notifications).unwrap_or_default().channels())
    }

    async fn course_title(&self, course_id: &str) -> Result<String> {
        let course: Option<Course> = self.store.get(course_id).await?;
        Ok(course.map(|c| c.title).unwrap_or_else(|| course_id.to_string()))
    }

    async fn certificate_message(&self, kind: CertificateKind, certificate: Option<&Certificate>) -> Result<String> {
        let message = match kind {
            CertificateKind::Course => {
                let title = match certificate.and_then(|c| c.course_id.as_deref()) {
                    Some(course_id) => self.course_title(course_id).await?,
                    None => "your course".to_string(),
                };
                format!("Your certificate for \"{}\" is ready.", title)
            }
            CertificateKind::Attestation => "Your compliance attestation has been issued.".to_string(),
            CertificateKind::Path => {
                let path = match certificate.and_then(|c| c.learning_path_id.as_deref()) {
                    Some(path_id) => self.store.get::<LearningPath>(path_id).await?,
                    None => None,
                };
                match path {
                    Some(path) => format!("Your learning path certificate for \"{}\" is ready.", path.title),
                    None => "Your learning path certificate is ready.".to_string(),
                }
            }
        };
        Ok(message)
    }
}

/// One line for the outbox record, naming each failed step
fn summarize(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.step, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

fn enrollment_payload(enrollment_id: &str, learner_id: &str, course_id: &str) -> Value {
    json!({
        "enrollmentId": enrollment_id,
        "userId": learner_id,
        "courseId": course_id,
    })
}
