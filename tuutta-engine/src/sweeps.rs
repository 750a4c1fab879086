//! Periodic tenant sweeps: deadline reminders, overdue marking, manager digest

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::info;
use tuutta_common::models::{Course, Enrollment, EnrollmentStatus, Member, NotificationSettings, Tenant};
use tuutta_common::{Datastore, Query, Result};

use crate::documents::{DocumentService, EnrollmentUpdate};
use crate::notifications::{enqueue_unique, NewNotification};
use crate::risk::analytics::is_overdue;

const ACTIVE_STATUSES: [EnrollmentStatus; 2] = [EnrollmentStatus::NotStarted, EnrollmentStatus::InProgress];

#[derive(Clone)]
pub struct Sweeps {
    store: Datastore,
    documents: DocumentService,
}

impl Sweeps {
    pub fn new(store: Datastore, documents: DocumentService) -> Self {
        Self { store, documents }
    }

    async fn settings(&self, tenant_id: &str) -> Result<NotificationSettings> {
        let tenant: Option<Tenant> = self.store.get(tenant_id).await?;
        Ok(tenant.map(|t| t.notifications).unwrap_or_default())
    }

    async fn active_enrollments(&self, tenant_id: &str) -> Result<Vec<Enrollment>> {
        self.store
            .query(
                &Query::tenant(tenant_id)
                    .is_in("status", ACTIVE_STATUSES.iter().map(|s| s.as_str()))
                    .not_null("dueAt")
                    .order_by("dueAt"),
            )
            .await
    }

    async fn course_title(&self, course_id: &str) -> Result<String> {
        let course: Option<Course> = self.store.get(course_id).await?;
        Ok(course.map(|c| c.title).unwrap_or_else(|| course_id.to_string()))
    }

    /// Remind learners of enrollments due within the tenant's reminder window
    ///
    /// Returns the number of reminders queued.
    pub async fn deadline_reminders(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let settings = self.settings(tenant_id).await?;
        if !settings.assignment_due {
            return Ok(0);
        }

        let horizon = now + Duration::days(i64::from(settings.reminder_days_before));
        let channels = settings.channels();
        let mut queued = 0;

        for enrollment in self.active_enrollments(tenant_id).await? {
            let Some(due_at) = enrollment.due_at else {
                continue;
            };
            if due_at < now || due_at > horizon {
                continue;
            }

            let title = self.course_title(&enrollment.course_id).await?;
            let notification = NewNotification::new(
                tenant_id,
                &enrollment.learner_id,
                "enrollment_reminder",
                "Training due soon",
                format!("\"{}\" is due on {}.", title, due_at.format("%Y-%m-%d")),
            )
            .with_channels(channels.clone())
            .with_payload(json!({ "enrollmentId": enrollment.id, "dueAt": due_at.timestamp_millis() }))
            .about(&enrollment.id);

            if enqueue_unique(&self.store, notification, now).await?.is_some() {
                queued += 1;
            }
        }

        if queued > 0 {
            info!(tenant_id, queued, "Deadline reminders queued");
        }
        Ok(queued)
    }

    /// Move active enrollments past their due date to `overdue`
    ///
    /// Goes through the guarded write path, so each move is announced as
    /// `enrollment.overdue`. Returns the number of enrollments moved.
    pub async fn overdue_sweep(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let settings = self.settings(tenant_id).await?;
        let channels = settings.channels();
        let mut moved = 0;

        for enrollment in self.active_enrollments(tenant_id).await? {
            if !is_overdue(&enrollment, now) {
                continue;
            }

            let verdict = self
                .documents
                .update_enrollment(&enrollment.id, EnrollmentUpdate::status(EnrollmentStatus::Overdue))
                .await?;
            if verdict.is_reverted() {
                continue;
            }
            moved += 1;

            if settings.assignment_due {
                let title = self.course_title(&enrollment.course_id).await?;
                let notification = NewNotification::new(
                    tenant_id,
                    &enrollment.learner_id,
                    "enrollment_overdue",
                    "Training overdue",
                    format!("\"{}\" is past its due date.", title),
                )
                .with_channels(channels.clone())
                .with_payload(json!({ "enrollmentId": enrollment.id }))
                .about(&enrollment.id);
                enqueue_unique(&self.store, notification, now).await?;
            }
        }

        if moved > 0 {
            info!(tenant_id, moved, "Enrollments marked overdue");
        }
        Ok(moved)
    }

    /// Send tenant-wide enrollment counts to every member in a digest role
    ///
    /// Returns the number of digests queued; zero when the digest is disabled.
    pub async fn manager_digest(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let settings = self.settings(tenant_id).await?;
        if !settings.manager_digest_enabled || settings.manager_digest_roles.is_empty() {
            return Ok(0);
        }

        let scope = Query::tenant(tenant_id);
        let enrollments: Vec<Enrollment> = self.store.query(&scope).await?;
        let total = enrollments.len();
        let completed = enrollments
            .iter()
            .filter(|e| e.status == EnrollmentStatus::Completed)
            .count();
        let overdue = enrollments.iter().filter(|e| is_overdue(e, now)).count();

        let recipients: Vec<Member> = self
            .store
            .query(&scope.clone().is_in("role", settings.manager_digest_roles.iter()))
            .await?;

        let channels = settings.channels();
        let mut queued = 0;
        for member in recipients {
            let notification = NewNotification::new(
                tenant_id,
                &member.user_id,
                "manager_digest",
                "Manager digest",
                format!(
                    "Total enrollments: {}. Completed: {}. Overdue: {}.",
                    total, completed, overdue
                ),
            )
            .with_channels(channels.clone())
            .with_payload(json!({ "total": total, "completed": completed, "overdue": overdue }))
            .about("digest");

            if enqueue_unique(&self.store, notification, now).await?.is_some() {
                queued += 1;
            }
        }

        if queued > 0 {
            info!(tenant_id, queued, "Manager digests queued");
        }
        Ok(queued)
    }
}
