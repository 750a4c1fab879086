//! Tenant-wide learning metrics derived during a scoring run

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use tuutta_common::models::{
    AnalyticsSummary, AssessmentResult, ComplianceSnapshot, DailyPoint, Enrollment, EnrollmentStatus,
    ModuleDropOff, ModuleProgress, QuestionDifficulty, RiskLevel, RiskScore,
};
use tuutta_common::time::{fractional_days_between, trailing_days};

/// Length of the daily activity series
pub const SERIES_DAYS: u32 = 30;

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Overdue by status, or still active past its due date
pub fn is_overdue(enrollment: &Enrollment, now: DateTime<Utc>) -> bool {
    enrollment.status == EnrollmentStatus::Overdue
        || (enrollment.status.is_active() && enrollment.due_at.is_some_and(|due| due < now))
}

pub fn compute_summary(
    tenant_id: &str,
    enrollments: &[Enrollment],
    assessments: &[AssessmentResult],
    module_progress: &[ModuleProgress],
    scores: &[RiskScore],
    now: DateTime<Utc>,
) -> AnalyticsSummary {
    let total = enrollments.len();
    let completed: Vec<&Enrollment> = enrollments
        .iter()
        .filter(|e| e.status == EnrollmentStatus::Completed)
        .collect();
    let completion_rate = percent(completed.len(), total);
    let overdue_count = enrollments.iter().filter(|e| is_overdue(e, now)).count();

    let passed = assessments.iter().filter(|a| a.passed).count();
    let assessment_pass_rate = percent(passed, assessments.len());
    let average_score = if assessments.is_empty() {
        0.0
    } else {
        assessments.iter().map(|a| a.score).sum::<f64>() / assessments.len() as f64
    };

    let durations: Vec<f64> = completed
        .iter()
        .filter_map(|e| Some(fractional_days_between(e.assigned_at?, e.completed_at?)))
        .collect();
    let avg_days_to_complete =
        (!durations.is_empty()).then(|| durations.iter().sum::<f64>() / durations.len() as f64);

    let high = scores.iter().filter(|s| s.level == RiskLevel::High).count();
    let medium = scores.iter().filter(|s| s.level == RiskLevel::Medium).count();

    AnalyticsSummary {
        id: tenant_id.to_string(),
        tenant_id: tenant_id.to_string(),
        total_enrollments: total as u32,
        completion_rate,
        overdue_count: overdue_count as u32,
        assessment_pass_rate,
        average_score,
        avg_days_to_complete,
        compliance_risk: percent(high + medium, total),
        content_effectiveness: completion_rate / 100.0 * average_score,
        high_risk_count: high as u32,
        medium_risk_count: medium as u32,
        question_difficulty: question_difficulty(assessments),
        module_drop_off: module_drop_off(module_progress),
        daily_series: daily_series(enrollments, assessments, now),
        computed_at: now,
    }
}

pub fn compliance_snapshot(summary: &AnalyticsSummary, threshold: u32) -> ComplianceSnapshot {
    let date = summary.computed_at.date_naive();
    ComplianceSnapshot {
        id: ComplianceSnapshot::doc_id(&summary.tenant_id, date),
        tenant_id: summary.tenant_id.clone(),
        date,
        completion_rate: summary.completion_rate,
        overdue_count: summary.overdue_count,
        compliance_risk: summary.compliance_risk,
        risk_threshold: threshold,
    }
}

/// Hardest questions first
pub fn question_difficulty(assessments: &[AssessmentResult]) -> Vec<QuestionDifficulty> {
    let mut tally: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
    for answer in assessments.iter().flat_map(|a| &a.answers) {
        let entry = tally.entry(answer.question_id.as_str()).or_default();
        entry.0 += 1;
        if !answer.correct {
            entry.1 += 1;
        }
    }

    let mut questions: Vec<QuestionDifficulty> = tally
        .into_iter()
        .map(|(question_id, (answered, incorrect))| QuestionDifficulty {
            question_id: question_id.to_string(),
            answered,
            incorrect,
            incorrect_rate: percent(incorrect as usize, answered as usize),
        })
        .collect();
    // Stable sort keeps question id order among equal rates
    questions.sort_by(|a, b| b.incorrect_rate.total_cmp(&a.incorrect_rate));
    questions
}

pub fn module_drop_off(module_progress: &[ModuleProgress]) -> Vec<ModuleDropOff> {
    let mut tally: BTreeMap<(&str, &str), (u32, u32)> = BTreeMap::new();
    for progress in module_progress {
        let started = progress.started_at.is_some() || progress.completed_at.is_some();
        if !started {
            continue;
        }
        let entry = tally
            .entry((progress.course_id.as_str(), progress.module_id.as_str()))
            .or_default();
        entry.0 += 1;
        if progress.completed_at.is_some() {
            entry.1 += 1;
        }
    }

    tally
        .into_iter()
        .map(|((course_id, module_id), (started, completed))| ModuleDropOff {
            course_id: course_id.to_string(),
            module_id: module_id.to_string(),
            started,
            completed,
            drop_off_rate: percent((started - completed) as usize, started as usize),
        })
        .collect()
}

/// Completions, submissions and pass rate for each of the last 30 days
pub fn daily_series(enrollments: &[Enrollment], assessments: &[AssessmentResult], now: DateTime<Utc>) -> Vec<DailyPoint> {
    let mut completions: HashMap<NaiveDate, u32> = HashMap::new();
    for at in enrollments.iter().filter_map(|e| e.completed_at) {
        *completions.entry(at.date_naive()).or_default() += 1;
    }

    let mut submissions: HashMap<NaiveDate, (u32, u32)> = HashMap::new();
    for assessment in assessments {
        if let Some(at) = assessment.submitted_at {
            let entry = submissions.entry(at.date_naive()).or_default();
            entry.0 += 1;
            if assessment.passed {
                entry.1 += 1;
            }
        }
    }

    trailing_days(now, SERIES_DAYS)
        .into_iter()
        .map(|date| {
            let (submitted, passed) = submissions.get(&date).copied().unwrap_or_default();
            DailyPoint {
                date,
                completions: completions.get(&date).copied().unwrap_or_default(),
                assessments: submitted,
                pass_rate: (submitted > 0).then(|| percent(passed as usize, submitted as usize)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tuutta_common::models::{AssessmentMetadata, QuestionAnswer};

    fn assessment(id: &str, score: f64, passed: bool, answers: &[(&str, bool)], now: DateTime<Utc>) -> AssessmentResult {
        AssessmentResult {
            id: id.into(),
            tenant_id: "t1".into(),
            learner_id: "u1".into(),
            enrollment_id: "e1".into(),
            course_id: "c1".into(),
            assessment_id: "a1".into(),
            score,
            attempts: 1,
            passed,
            submitted_at: Some(now),
            answers: answers
                .iter()
                .map(|(q, correct)| QuestionAnswer {
                    question_id: q.to_string(),
                    correct: *correct,
                })
                .collect(),
            metadata: AssessmentMetadata::default(),
        }
    }

    #[test]
    fn test_summary_rates() {
        let now = Utc::now();
        let mut done = Enrollment::new("e1", "t1", "u1", "c1", now - Duration::days(4));
        done.status = EnrollmentStatus::Completed;
        done.completed_at = Some(now);
        let mut late = Enrollment::new("e2", "t1", "u2", "c1", now - Duration::days(10));
        late.due_at = Some(now - Duration::days(1));

        let assessments = [
            assessment("r1", 90.0, true, &[], now),
            assessment("r2", 50.0, false, &[], now),
        ];

        let summary = compute_summary("t1", &[done, late], &assessments, &[], &[], now);

        assert_eq!(summary.total_enrollments, 2);
        assert_eq!(summary.completion_rate, 50.0);
        assert_eq!(summary.overdue_count, 1);
        assert_eq!(summary.assessment_pass_rate, 50.0);
        assert_eq!(summary.average_score, 70.0);
        assert_eq!(summary.content_effectiveness, 35.0);
        assert_eq!(summary.avg_days_to_complete, Some(4.0));
        assert_eq!(summary.daily_series.len(), SERIES_DAYS as usize);
        let today = summary.daily_series.last().unwrap();
        assert_eq!(today.completions, 1);
        assert_eq!(today.pass_rate, Some(50.0));
    }

    #[test]
    fn test_question_difficulty_sorted_hardest_first() {
        let now = Utc::now();
        let assessments = [
            assessment("r1", 50.0, false, &[("q1", true), ("q2", false)], now),
            assessment("r2", 50.0, false, &[("q1", false), ("q2", false)], now),
        ];

        let questions = question_difficulty(&assessments);

        assert_eq!(questions[0].question_id, "q2");
        assert_eq!(questions[0].incorrect_rate, 100.0);
        assert_eq!(questions[1].incorrect_rate, 50.0);
    }

    #[test]
    fn test_module_drop_off() {
        let now = Utc::now();
        let progress = |id: &str, completed: bool| ModuleProgress {
            id: id.into(),
            tenant_id: "t1".into(),
            learner_id: id.into(),
            course_id: "c1".into(),
            module_id: "m1".into(),
            started_at: Some(now),
            completed_at: completed.then_some(now),
        };

        let drop_off = module_drop_off(&[progress("p1", true), progress("p2", false), progress("p3", false), progress("p4", false)]);

        assert_eq!(drop_off.len(), 1);
        assert_eq!(drop_off[0].started, 4);
        assert_eq!(drop_off[0].completed, 1);
        assert_eq!(drop_off[0].drop_off_rate, 75.0);
    }
}
