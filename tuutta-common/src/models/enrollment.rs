use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

/// Enrollment status
///
/// Declaration order is the rank order used by the state machine guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    NotStarted,
    InProgress,
    Overdue,
    Failed,
    Completed,
    Expired,
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 6] = [
        EnrollmentStatus::NotStarted,
        EnrollmentStatus::InProgress,
        EnrollmentStatus::Overdue,
        EnrollmentStatus::Failed,
        EnrollmentStatus::Completed,
        EnrollmentStatus::Expired,
    ];

    /// Position in the monotonic progression
    pub fn rank(self) -> u8 {
        match self {
            EnrollmentStatus::NotStarted => 0,
            EnrollmentStatus::InProgress => 1,
            EnrollmentStatus::Overdue => 2,
            EnrollmentStatus::Failed => 3,
            EnrollmentStatus::Completed => 4,
            EnrollmentStatus::Expired => 5,
        }
    }

    /// Learner can still make progress (sweeps only touch these)
    pub fn is_active(self) -> bool {
        matches!(self, EnrollmentStatus::NotStarted | EnrollmentStatus::InProgress)
    }

    /// Outcome is known for calibration purposes
    pub fn is_terminal_or_overdue(self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Completed
                | EnrollmentStatus::Failed
                | EnrollmentStatus::Expired
                | EnrollmentStatus::Overdue
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::NotStarted => "not_started",
            EnrollmentStatus::InProgress => "in_progress",
            EnrollmentStatus::Overdue => "overdue",
            EnrollmentStatus::Failed => "failed",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learner's assignment to a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub tenant_id: String,
    pub learner_id: String,
    pub course_id: String,
    #[serde(default)]
    pub learning_path_id: Option<String>,
    pub status: EnrollmentStatus,
    /// Percentage complete, 0-100
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Reference to the issued course certificate
    #[serde(default)]
    pub certificate_id: Option<String>,
    #[serde(default)]
    pub attestation_issued: bool,
}

impl Enrollment {
    /// New, unstarted enrollment assigned at `assigned_at`
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        learner_id: impl Into<String>,
        course_id: impl Into<String>,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            learner_id: learner_id.into(),
            course_id: course_id.into(),
            learning_path_id: None,
            status: EnrollmentStatus::NotStarted,
            progress: 0.0,
            attempts: 0,
            assigned_at: Some(assigned_at),
            due_at: None,
            completed_at: None,
            last_accessed_at: None,
            certificate_id: None,
            attestation_issued: false,
        }
    }

    /// Completed on or before its due date
    pub fn completed_on_time(&self) -> bool {
        match (self.completed_at, self.due_at) {
            (Some(completed), Some(due)) => completed <= due,
            _ => false,
        }
    }
}

impl Document for Enrollment {
    const COLLECTION: &'static str = "enrollments";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
