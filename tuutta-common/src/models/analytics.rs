use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::compose_id;
use crate::db::Document;

/// Incorrect-answer rate for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDifficulty {
    pub question_id: String,
    pub answered: u32,
    pub incorrect: u32,
    pub incorrect_rate: f64,
}

/// Learners who started a module but never completed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDropOff {
    pub course_id: String,
    pub module_id: String,
    pub started: u32,
    pub completed: u32,
    pub drop_off_rate: f64,
}

/// One day of the trailing activity series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub completions: u32,
    pub assessments: u32,
    /// Percentage, `None` when no assessment was submitted that day
    #[serde(default)]
    pub pass_rate: Option<f64>,
}

/// Latest tenant-wide metrics; one per tenant, overwritten each run
///
/// Rates are percentages in 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    /// Same as the tenant id
    pub id: String,
    pub tenant_id: String,
    pub total_enrollments: u32,
    pub completion_rate: f64,
    pub overdue_count: u32,
    pub assessment_pass_rate: f64,
    pub average_score: f64,
    /// `None` until at least one enrollment completes
    #[serde(default)]
    pub avg_days_to_complete: Option<f64>,
    pub compliance_risk: f64,
    pub content_effectiveness: f64,
    pub high_risk_count: u32,
    pub medium_risk_count: u32,
    pub question_difficulty: Vec<QuestionDifficulty>,
    pub module_drop_off: Vec<ModuleDropOff>,
    pub daily_series: Vec<DailyPoint>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub computed_at: DateTime<Utc>,
}

impl Document for AnalyticsSummary {
    const COLLECTION: &'static str = "analytics_summaries";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

/// Dated compliance state; one per tenant per day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceSnapshot {
    pub id: String,
    pub tenant_id: String,
    pub date: NaiveDate,
    pub completion_rate: f64,
    pub overdue_count: u32,
    pub compliance_risk: f64,
    pub risk_threshold: u32,
}

impl ComplianceSnapshot {
    pub fn doc_id(tenant_id: &str, date: NaiveDate) -> String {
        compose_id(&[tenant_id, &date.format("%Y-%m-%d").to_string()])
    }
}

impl Document for ComplianceSnapshot {
    const COLLECTION: &'static str = "compliance_snapshots";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
