//! Domain models
//!
//! Every model is a tenant-scoped document stored once in the document table,
//! keyed by its id and indexed by tenant id. Field names are camelCase on the
//! wire and in storage; timestamps are epoch milliseconds.

mod analytics;
mod assessment;
mod audit;
mod certificate;
mod enrollment;
mod notification;
mod organization;
mod risk;
mod webhook;

pub use analytics::{AnalyticsSummary, ComplianceSnapshot, DailyPoint, ModuleDropOff, QuestionDifficulty};
pub use assessment::{AssessmentMetadata, AssessmentResult, QuestionAnswer};
pub use audit::{AuditLogEntry, SystemError};
pub use certificate::{Certificate, CertificateEvidence, CertificateKind};
pub use enrollment::{Enrollment, EnrollmentStatus};
pub use notification::{Channel, NotificationRecord, NotificationStatus};
pub use organization::{Course, LearningPath, Member, ModuleProgress, NotificationSettings, Tenant};
pub use risk::{Audience, Recommendation, RiskLevel, RiskModelCalibration, RiskScore, Severity};
pub use webhook::{DeliveryOutcome, WebhookDelivery, WebhookSubscription};

/// Compose a deterministic document id from its parts
///
/// Used wherever the id doubles as an idempotency key (risk scores,
/// recommendations, certificates): writing the same logical record twice
/// lands on the same document.
pub fn compose_id(parts: &[&str]) -> String {
    parts.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_id_joins_parts() {
        assert_eq!(compose_id(&["t1", "learner", "e9"]), "t1_learner_e9");
    }
}
