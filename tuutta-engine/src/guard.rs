//! State machine guard for progress-bearing records
//!
//! Every enrollment or assessment write is screened against the stored
//! record before it lands. A write that moves a record backwards is
//! corrected, not rejected: the guarded fields keep their previous values,
//! the rest of the write goes through, and the blocked transition is
//! recorded in the audit log. The guard never emits domain events or
//! notifications.

use serde_json::json;
use tracing::warn;
use tuutta_common::models::{AssessmentResult, AuditLogEntry, Enrollment, EnrollmentStatus};
use tuutta_common::{Datastore, Result};

use crate::audit::record_audit;

/// `from -> to` moves backwards under the rank order
///
/// Moving into `completed` is always allowed, as is `overdue -> failed`.
pub fn is_status_regression(from: EnrollmentStatus, to: EnrollmentStatus) -> bool {
    if to == EnrollmentStatus::Completed {
        return false;
    }
    if from == EnrollmentStatus::Overdue && to == EnrollmentStatus::Failed {
        return false;
    }
    to.rank() < from.rank()
}

/// Score or attempts went down
pub fn is_assessment_regression(before: &AssessmentResult, after: &AssessmentResult) -> bool {
    after.score < before.score || after.attempts < before.attempts
}

/// What the guard did with a write
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<T> {
    /// Write stands as requested
    Accepted(T),
    /// Guarded fields were restored; holds the record as it is stored
    Reverted(T),
}

impl<T> Verdict<T> {
    pub fn is_reverted(&self) -> bool {
        matches!(self, Verdict::Reverted(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Verdict::Accepted(value) | Verdict::Reverted(value) => value,
        }
    }

    pub fn as_inner(&self) -> &T {
        match self {
            Verdict::Accepted(value) | Verdict::Reverted(value) => value,
        }
    }
}

/// Screen an enrollment write, restoring the status on a regression
pub fn check_enrollment(before: &Enrollment, mut after: Enrollment) -> Verdict<Enrollment> {
    if !is_status_regression(before.status, after.status) {
        return Verdict::Accepted(after);
    }
    after.status = before.status;
    Verdict::Reverted(after)
}

/// Screen an assessment write, restoring score and attempts if either dropped
pub fn check_assessment(before: &AssessmentResult, mut after: AssessmentResult) -> Verdict<AssessmentResult> {
    if !is_assessment_regression(before, &after) {
        return Verdict::Accepted(after);
    }
    after.score = before.score;
    after.attempts = before.attempts;
    Verdict::Reverted(after)
}

/// Log and audit a blocked enrollment status change
pub async fn record_blocked_enrollment(
    store: &Datastore,
    before: &Enrollment,
    attempted: EnrollmentStatus,
) -> Result<()> {
    warn!(
        tenant_id = %before.tenant_id,
        enrollment_id = %before.id,
        from = %before.status,
        to = %attempted,
        "Blocked enrollment status regression"
    );

    let entry = AuditLogEntry::system(
        &before.tenant_id,
        "enrollment.status_regression_blocked",
        "enrollment",
        &before.id,
        json!({
            "before": { "status": before.status },
            "attempted": { "status": attempted },
        }),
    );
    record_audit(store, &entry).await
}

/// Log and audit a blocked assessment regression
pub async fn record_blocked_assessment(
    store: &Datastore,
    before: &AssessmentResult,
    attempted: &AssessmentResult,
) -> Result<()> {
    warn!(
        tenant_id = %before.tenant_id,
        assessment_result_id = %before.id,
        score_before = before.score,
        score_after = attempted.score,
        attempts_before = before.attempts,
        attempts_after = attempted.attempts,
        "Blocked assessment regression"
    );

    let entry = AuditLogEntry::system(
        &before.tenant_id,
        "assessment.regression_blocked",
        "assessment_result",
        &before.id,
        json!({
            "before": { "score": before.score, "attempts": before.attempts },
            "attempted": { "score": attempted.score, "attempts": attempted.attempts },
        }),
    );
    record_audit(store, &entry).await
}
