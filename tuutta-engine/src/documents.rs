//! Guarded write path for progress-bearing records
//!
//! All enrollment and assessment mutations go through [`DocumentService`].
//! Each one is a read-screen-write cycle: the stored record is read, the
//! guard screens the requested change against it, and the result is
//! written only if the stored body is still the one that was read. A lost
//! race re-reads and screens again, so the guard always judges a write
//! against the record it actually replaces. Only accepted changes are
//! appended to the outbox.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use tuutta_common::events::DomainEvent;
use tuutta_common::models::{AssessmentResult, Enrollment, EnrollmentStatus};
use tuutta_common::{Datastore, Error, Result};

use crate::guard::{check_assessment, check_enrollment, record_blocked_assessment, record_blocked_enrollment, Verdict};
use crate::outbox::Outbox;

/// Read-screen-write cycles attempted before giving up on a contended record
pub const MAX_WRITE_ATTEMPTS: usize = 16;

/// Partial update of an enrollment; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct EnrollmentUpdate {
    pub status: Option<EnrollmentStatus>,
    pub progress: Option<f64>,
    pub attempts: Option<u32>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl EnrollmentUpdate {
    pub fn status(status: EnrollmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// `enrollment` with this update applied
    ///
    /// A move into `completed` stamps the completion time at `now` unless
    /// the update or the record already carries one.
    fn apply(&self, enrollment: &Enrollment, now: DateTime<Utc>) -> Enrollment {
        let mut after = enrollment.clone();
        if let Some(status) = self.status {
            after.status = status;
        }
        if let Some(progress) = self.progress {
            after.progress = progress.clamp(0.0, 100.0);
        }
        if let Some(attempts) = self.attempts {
            after.attempts = attempts;
        }
        if let Some(due_at) = self.due_at {
            after.due_at = Some(due_at);
        }
        if let Some(completed_at) = self.completed_at {
            after.completed_at = Some(completed_at);
        }
        if let Some(last_accessed_at) = self.last_accessed_at {
            after.last_accessed_at = Some(last_accessed_at);
        }
        if after.status == EnrollmentStatus::Completed
            && enrollment.status != EnrollmentStatus::Completed
            && after.completed_at.is_none()
        {
            after.completed_at = Some(now);
        }
        after
    }
}

#[derive(Clone)]
pub struct DocumentService {
    store: Datastore,
    outbox: Outbox,
}

impl DocumentService {
    pub fn new(store: Datastore, outbox: Outbox) -> Self {
        Self { store, outbox }
    }

    /// Store a new enrollment and announce it
    pub async fn create_enrollment(&self, enrollment: Enrollment) -> Result<Enrollment> {
        self.store.create(&enrollment).await?;

        info!(
            tenant_id = %enrollment.tenant_id,
            enrollment_id = %enrollment.id,
            learner_id = %enrollment.learner_id,
            "Enrollment created"
        );

        self.outbox
            .append(DomainEvent::EnrollmentCreated {
                tenant_id: enrollment.tenant_id.clone(),
                enrollment_id: enrollment.id.clone(),
                learner_id: enrollment.learner_id.clone(),
                course_id: enrollment.course_id.clone(),
                timestamp: Utc::now(),
            })
            .await?;

        Ok(enrollment)
    }

    /// Apply `update` to an enrollment under the guard
    pub async fn update_enrollment(&self, id: &str, update: EnrollmentUpdate) -> Result<Verdict<Enrollment>> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self
                .store
                .get_versioned::<Enrollment>(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("Enrollment {}", id)))?;
            let before = current.value;

            let requested = update.apply(&before, Utc::now());
            let attempted_status = requested.status;
            let verdict = check_enrollment(&before, requested);

            if !self.store.replace_if_unchanged(&current.body, verdict.as_inner()).await? {
                debug!(enrollment_id = %id, attempt, "Enrollment changed during update, retrying");
                continue;
            }

            match &verdict {
                Verdict::Reverted(_) => {
                    record_blocked_enrollment(&self.store, &before, attempted_status).await?;
                }
                Verdict::Accepted(enrollment) if enrollment.status != before.status => {
                    info!(
                        tenant_id = %enrollment.tenant_id,
                        enrollment_id = %enrollment.id,
                        from = %before.status,
                        to = %enrollment.status,
                        "Enrollment status changed"
                    );
                    self.outbox
                        .append(DomainEvent::EnrollmentStatusChanged {
                            tenant_id: enrollment.tenant_id.clone(),
                            enrollment_id: enrollment.id.clone(),
                            learner_id: enrollment.learner_id.clone(),
                            course_id: enrollment.course_id.clone(),
                            before: before.status,
                            after: enrollment.status,
                            timestamp: Utc::now(),
                        })
                        .await?;
                }
                Verdict::Accepted(_) => {}
            }

            return Ok(verdict);
        }

        Err(Error::Internal(format!(
            "Enrollment {} kept changing; gave up after {} attempts",
            id, MAX_WRITE_ATTEMPTS
        )))
    }

    /// Insert or overwrite an assessment result under the guard
    pub async fn record_assessment(&self, result: AssessmentResult) -> Result<Verdict<AssessmentResult>> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let verdict = match self.store.get_versioned::<AssessmentResult>(&result.id).await? {
                None => {
                    if !self.store.create_if_absent(&result).await? {
                        debug!(assessment_result_id = %result.id, attempt, "Assessment created concurrently, retrying");
                        continue;
                    }
                    Verdict::Accepted(result.clone())
                }
                Some(current) => {
                    let verdict = check_assessment(&current.value, result.clone());
                    if !self.store.replace_if_unchanged(&current.body, verdict.as_inner()).await? {
                        debug!(assessment_result_id = %result.id, attempt, "Assessment changed during update, retrying");
                        continue;
                    }
                    if verdict.is_reverted() {
                        record_blocked_assessment(&self.store, &current.value, &result).await?;
                    }
                    verdict
                }
            };

            if let Verdict::Accepted(result) = &verdict {
                self.outbox
                    .append(DomainEvent::AssessmentRecorded {
                        tenant_id: result.tenant_id.clone(),
                        assessment_result_id: result.id.clone(),
                        enrollment_id: result.enrollment_id.clone(),
                        learner_id: result.learner_id.clone(),
                        score: result.score,
                        passed: result.passed,
                        timestamp: Utc::now(),
                    })
                    .await?;
            }

            return Ok(verdict);
        }

        Err(Error::Internal(format!(
            "Assessment result {} kept changing; gave up after {} attempts",
            result.id, MAX_WRITE_ATTEMPTS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stored(status: EnrollmentStatus) -> Enrollment {
        let assigned = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut enrollment = Enrollment::new("e1", "t1", "u1", "c1", assigned);
        enrollment.status = status;
        enrollment
    }

    #[test]
    fn test_apply_touches_only_set_fields() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let update = EnrollmentUpdate {
            progress: Some(140.0),
            ..EnrollmentUpdate::status(EnrollmentStatus::InProgress)
        };

        let after = update.apply(&stored(EnrollmentStatus::NotStarted), now);

        assert_eq!(after.status, EnrollmentStatus::InProgress);
        assert_eq!(after.progress, 100.0);
        assert!(after.due_at.is_none());
        assert!(after.completed_at.is_none());
    }

    #[test]
    fn test_completion_stamps_time_once() {
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let update = EnrollmentUpdate::status(EnrollmentStatus::Completed);

        let after = update.apply(&stored(EnrollmentStatus::InProgress), now);
        assert_eq!(after.completed_at, Some(now));

        let later = now + chrono::Duration::days(1);
        let again = update.apply(&after, later);
        assert_eq!(again.completed_at, Some(now));
    }
}
