//! Heuristic at-risk score per enrollment

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tuutta_common::models::{Enrollment, EnrollmentStatus, RiskLevel};
use tuutta_common::time::fractional_days_between;

pub const MAX_SCORE: u32 = 100;

pub const OVERDUE_POINTS: u32 = 40;
pub const INACTIVE_14D_POINTS: u32 = 30;
pub const INACTIVE_7D_POINTS: u32 = 20;
pub const SLOW_VELOCITY_POINTS: u32 = 25;
pub const MODERATE_VELOCITY_POINTS: u32 = 15;
pub const MANY_ATTEMPTS_POINTS: u32 = 10;
pub const LOW_HISTORY_POINTS: u32 = 10;

/// Scores at or above this are at least `medium`
pub const MEDIUM_THRESHOLD: u32 = 45;

/// Additive score, capped at 100, and the reason for each rule that fired
///
/// `learner_completion_rate` is the learner's completed share across all of
/// their enrollments in the tenant.
pub fn score_enrollment(
    enrollment: &Enrollment,
    learner_completion_rate: Option<f64>,
    now: DateTime<Utc>,
) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    if enrollment.status == EnrollmentStatus::Overdue {
        score += OVERDUE_POINTS;
        reasons.push("Enrollment is overdue".to_string());
    }

    if let Some(last_activity) = enrollment.last_accessed_at.or(enrollment.assigned_at) {
        let idle_days = fractional_days_between(last_activity, now);
        if idle_days > 14.0 {
            score += INACTIVE_14D_POINTS;
            reasons.push("No activity in over 14 days".to_string());
        } else if idle_days > 7.0 {
            score += INACTIVE_7D_POINTS;
            reasons.push("No activity in over 7 days".to_string());
        }
    }

    if let Some(assigned_at) = enrollment.assigned_at {
        let days = fractional_days_between(assigned_at, now).max(1.0);
        let velocity = enrollment.progress / days;
        if velocity < 0.5 {
            score += SLOW_VELOCITY_POINTS;
            reasons.push(format!("Slow progress ({:.2}% per day)", velocity));
        } else if velocity < 1.0 {
            score += MODERATE_VELOCITY_POINTS;
            reasons.push(format!("Below-pace progress ({:.2}% per day)", velocity));
        }
    }

    if enrollment.attempts >= 3 {
        score += MANY_ATTEMPTS_POINTS;
        reasons.push(format!("{} attempts so far", enrollment.attempts));
    }

    if learner_completion_rate.is_some_and(|rate| rate < 0.5) {
        score += LOW_HISTORY_POINTS;
        reasons.push("Learner completes fewer than half of assigned courses".to_string());
    }

    (score.min(MAX_SCORE), reasons)
}

/// Completed share of each learner's enrollments
pub fn learner_completion_rates(enrollments: &[Enrollment]) -> HashMap<&str, f64> {
    let mut counts: HashMap<&str, (u32, u32)> = HashMap::new();
    for enrollment in enrollments {
        let entry = counts.entry(enrollment.learner_id.as_str()).or_default();
        entry.0 += 1;
        if enrollment.status == EnrollmentStatus::Completed {
            entry.1 += 1;
        }
    }

    counts
        .into_iter()
        .map(|(learner, (total, completed))| (learner, f64::from(completed) / f64::from(total)))
        .collect()
}

pub fn classify(score: u32, threshold: u32) -> RiskLevel {
    if score >= threshold {
        RiskLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn enrollment(status: EnrollmentStatus, progress: f64, assigned_days_ago: i64, now: DateTime<Utc>) -> Enrollment {
        let mut e = Enrollment::new("e1", "t1", "u1", "c1", now - Duration::days(assigned_days_ago));
        e.status = status;
        e.progress = progress;
        e
    }

    #[test]
    fn test_fresh_enrollment_scores_low() {
        let now = Utc::now();
        let mut e = enrollment(EnrollmentStatus::InProgress, 50.0, 2, now);
        e.last_accessed_at = Some(now);

        let (score, reasons) = score_enrollment(&e, Some(1.0), now);

        assert_eq!(score, 0);
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_overdue_idle_slow_learner() {
        let now = Utc::now();
        let mut e = enrollment(EnrollmentStatus::Overdue, 20.0, 60, now);
        e.attempts = 3;

        let (score, reasons) = score_enrollment(&e, Some(0.25), now);

        // 40 + 30 + 25 + 10 + 10 capped
        assert_eq!(score, MAX_SCORE);
        assert_eq!(reasons.len(), 5);
    }

    #[test]
    fn test_velocity_floor_of_one_day() {
        let now = Utc::now();
        let mut e = enrollment(EnrollmentStatus::InProgress, 0.8, 0, now);
        e.last_accessed_at = Some(now);

        let (score, _) = score_enrollment(&e, None, now);

        assert_eq!(score, MODERATE_VELOCITY_POINTS);
    }

    #[test]
    fn test_seven_day_inactivity_band() {
        let now = Utc::now();
        let mut e = enrollment(EnrollmentStatus::InProgress, 100.0, 30, now);
        e.last_accessed_at = Some(now - Duration::days(10));

        let (score, _) = score_enrollment(&e, None, now);

        assert_eq!(score, INACTIVE_7D_POINTS);
    }

    #[test]
    fn test_classify_bands() {
        assert_eq!(classify(70, 70), RiskLevel::High);
        assert_eq!(classify(69, 70), RiskLevel::Medium);
        assert_eq!(classify(45, 70), RiskLevel::Medium);
        assert_eq!(classify(44, 70), RiskLevel::Low);
        // Threshold below the medium band
        assert_eq!(classify(45, 45), RiskLevel::High);
    }

    #[test]
    fn test_learner_completion_rates() {
        let now = Utc::now();
        let mut done = enrollment(EnrollmentStatus::Completed, 100.0, 5, now);
        done.id = "e2".into();
        let open = enrollment(EnrollmentStatus::InProgress, 10.0, 5, now);
        let enrollments = [done, open];
        let rates = learner_completion_rates(&enrollments);

        assert_eq!(rates["u1"], 0.5);
    }
}
