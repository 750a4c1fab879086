//! Recommendations derived from scores and metrics

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::json;
use tuutta_common::models::{
    AnalyticsSummary, Audience, Channel, Course, Enrollment, EnrollmentStatus, Member, Recommendation,
    RiskLevel, RiskScore, Severity,
};

use crate::notifications::NewNotification;

/// Content effectiveness below this triggers an L&D alert
pub const CONTENT_EFFECTIVENESS_FLOOR: f64 = 60.0;

/// Completion rate below this triggers the learner nudge
pub const COMPLETION_NUDGE_FLOOR: f64 = 70.0;

/// Inputs the recommendation rules read
pub struct RecommendationInputs<'a> {
    pub tenant_id: &'a str,
    pub summary: &'a AnalyticsSummary,
    pub scores: &'a [RiskScore],
    pub enrollments: &'a [Enrollment],
    pub members: &'a [Member],
    pub courses: &'a [Course],
    pub channels: &'a [Channel],
    pub now: DateTime<Utc>,
}

/// Recommendations to store and the notifications that go with them
#[derive(Debug, Default)]
pub struct RecommendationSet {
    pub recommendations: Vec<Recommendation>,
    pub notifications: Vec<NewNotification>,
}

impl RecommendationSet {
    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        inputs: &RecommendationInputs<'_>,
        kind: &str,
        entity_id: &str,
        audience: Audience,
        target_user_id: Option<&str>,
        severity: Severity,
        title: String,
        message: String,
    ) {
        self.recommendations.push(Recommendation {
            id: Recommendation::doc_id(inputs.tenant_id, kind, entity_id),
            tenant_id: inputs.tenant_id.to_string(),
            audience,
            target_user_id: target_user_id.map(String::from),
            severity,
            title,
            message,
            entity_id: entity_id.to_string(),
            created_at: inputs.now,
        });
    }
}

pub fn build_recommendations(inputs: &RecommendationInputs<'_>) -> RecommendationSet {
    let mut set = RecommendationSet::default();
    let summary = inputs.summary;

    let high = summary.high_risk_count;
    let medium = summary.medium_risk_count;
    if high + medium > 0 {
        set.push(
            inputs,
            "manager_at_risk",
            inputs.tenant_id,
            Audience::Manager,
            None,
            if high > 0 { Severity::Critical } else { Severity::Warning },
            "Learners at risk".to_string(),
            format!(
                "{} high-risk and {} medium-risk enrollments need attention.",
                high, medium
            ),
        );
    }

    if summary.total_enrollments > 0 && summary.content_effectiveness < CONTENT_EFFECTIVENESS_FLOOR {
        set.push(
            inputs,
            "ld_content_effectiveness",
            inputs.tenant_id,
            Audience::Ld,
            None,
            Severity::Warning,
            "Content effectiveness is low".to_string(),
            format!(
                "Content effectiveness is {:.1}%. Review assessments and modules with high drop-off.",
                summary.content_effectiveness
            ),
        );
    }

    if summary.total_enrollments > 0 && summary.completion_rate < COMPLETION_NUDGE_FLOOR {
        if let Some((course, rate)) = best_completion_course(inputs.enrollments, inputs.courses) {
            set.push(
                inputs,
                "learner_nudge",
                &course.id,
                Audience::Learner,
                None,
                Severity::Info,
                "Recommended course".to_string(),
                format!(
                    "Learners complete \"{}\" most often ({:.0}% completion). Start there to build momentum.",
                    course.title, rate
                ),
            );
        }
    }

    let members: HashMap<&str, &Member> = inputs.members.iter().map(|m| (m.user_id.as_str(), m)).collect();
    let courses: HashMap<&str, &Course> = inputs.courses.iter().map(|c| (c.id.as_str(), c)).collect();

    for score in inputs.scores.iter().filter(|s| s.level == RiskLevel::High) {
        let course_title = courses
            .get(score.course_id.as_str())
            .map(|c| c.title.as_str())
            .unwrap_or(score.course_id.as_str());
        let reasons = score.reasons.join("; ");
        let payload = json!({
            "enrollmentId": score.enrollment_id,
            "courseId": score.course_id,
            "score": score.score,
        });

        let message = format!("You are at risk of not completing \"{}\". {}", course_title, reasons);
        set.push(
            inputs,
            "learner_at_risk",
            &score.enrollment_id,
            Audience::Learner,
            Some(&score.learner_id),
            Severity::Warning,
            "You are at risk".to_string(),
            message.clone(),
        );
        set.notifications.push(
            NewNotification::new(inputs.tenant_id, &score.learner_id, "risk_alert", "You are at risk", message)
                .with_channels(inputs.channels.to_vec())
                .with_payload(payload.clone())
                .about(&score.enrollment_id),
        );

        let learner = members.get(score.learner_id.as_str());
        let Some(manager_id) = learner.and_then(|m| m.manager_id.as_deref()) else {
            continue;
        };
        let learner_name = learner
            .map(|m| m.display_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(score.learner_id.as_str());
        let message = format!(
            "{} is at high risk on \"{}\" (score {}). {}",
            learner_name, course_title, score.score, reasons
        );
        set.push(
            inputs,
            "manager_escalation",
            &score.enrollment_id,
            Audience::Manager,
            Some(manager_id),
            Severity::Critical,
            "Team member at risk".to_string(),
            message.clone(),
        );
        set.notifications.push(
            NewNotification::new(inputs.tenant_id, manager_id, "risk_escalation", "Team member at risk", message)
                .with_channels(inputs.channels.to_vec())
                .with_payload(payload)
                .about(&score.enrollment_id),
        );
    }

    set
}

/// Course with the highest completion rate; lowest course id wins ties
fn best_completion_course<'a>(enrollments: &[Enrollment], courses: &'a [Course]) -> Option<(&'a Course, f64)> {
    let mut tally: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for enrollment in enrollments {
        let entry = tally.entry(enrollment.course_id.as_str()).or_default();
        entry.0 += 1;
        if enrollment.status == EnrollmentStatus::Completed {
            entry.1 += 1;
        }
    }

    let mut best: Option<(&Course, f64)> = None;
    for (course_id, (total, completed)) in tally {
        let Some(course) = courses.iter().find(|c| c.id == course_id) else {
            continue;
        };
        let rate = f64::from(completed) / f64::from(total) * 100.0;
        if best.map_or(true, |(_, best_rate)| rate > best_rate) {
            best = Some((course, rate));
        }
    }
    best
}
