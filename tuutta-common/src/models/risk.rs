use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compose_id;
use crate::db::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn is_at_risk(self) -> bool {
        matches!(self, RiskLevel::Medium | RiskLevel::High)
    }
}

/// Per-enrollment risk, replaced wholesale on every scoring run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub id: String,
    pub tenant_id: String,
    pub enrollment_id: String,
    pub learner_id: String,
    pub course_id: String,
    /// 0-100
    pub score: u32,
    pub level: RiskLevel,
    pub reasons: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub computed_at: DateTime<Utc>,
}

impl RiskScore {
    pub fn doc_id(tenant_id: &str, enrollment_id: &str) -> String {
        compose_id(&[tenant_id, enrollment_id])
    }
}

impl Document for RiskScore {
    const COLLECTION: &'static str = "risk_scores";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

/// Threshold chosen by the last calibration run; one per tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskModelCalibration {
    /// Same as the tenant id
    pub id: String,
    pub tenant_id: String,
    pub threshold: u32,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Enrollments with a known outcome that the threshold was fitted on
    pub sample_size: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub trained_at: DateTime<Utc>,
}

impl Document for RiskModelCalibration {
    const COLLECTION: &'static str = "risk_model_calibrations";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Learner,
    Manager,
    Ld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Prioritized advice derived from a scoring run
///
/// The id embeds the originating entity so re-runs overwrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub tenant_id: String,
    pub audience: Audience,
    #[serde(default)]
    pub target_user_id: Option<String>,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Entity the recommendation was derived from (enrollment, course, tenant)
    pub entity_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn doc_id(tenant_id: &str, kind: &str, entity_id: &str) -> String {
        compose_id(&[tenant_id, kind, entity_id])
    }
}

impl Document for Recommendation {
    const COLLECTION: &'static str = "recommendations";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
