use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

/// Answer to a single question within an assessment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnswer {
    pub question_id: String,
    pub correct: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentMetadata {
    #[serde(default)]
    pub competency_tags: Vec<String>,
    #[serde(default)]
    pub weak_topics: Vec<String>,
    #[serde(default)]
    pub passing_score: Option<f64>,
    /// Days after which the learner must recertify
    #[serde(default)]
    pub recertification_days: Option<u32>,
}

/// Recorded outcome of a learner's assessment for one enrollment
///
/// `score` and `attempts` never move backwards once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    pub id: String,
    pub tenant_id: String,
    pub learner_id: String,
    pub enrollment_id: String,
    pub course_id: String,
    pub assessment_id: String,
    pub score: f64,
    pub attempts: u32,
    pub passed: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Vec<QuestionAnswer>,
    #[serde(default)]
    pub metadata: AssessmentMetadata,
}

impl Document for AssessmentResult {
    const COLLECTION: &'static str = "assessment_results";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
