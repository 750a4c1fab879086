//! Threshold calibration against known outcomes

use tuutta_common::models::{Enrollment, EnrollmentStatus};

/// Evaluated in this order; earlier candidates win ties
pub const CANDIDATE_THRESHOLDS: [u32; 6] = [45, 55, 65, 70, 75, 80];

/// Used when there is nothing to calibrate against
pub const DEFAULT_THRESHOLD: u32 = 70;

/// Enrollment with a due date and an outcome that is already known
pub fn is_calibration_sample(enrollment: &Enrollment) -> bool {
    enrollment.due_at.is_some() && enrollment.status.is_terminal_or_overdue()
}

/// Ended up overdue or failed
pub fn was_at_risk(status: EnrollmentStatus) -> bool {
    matches!(status, EnrollmentStatus::Overdue | EnrollmentStatus::Failed)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    pub threshold: u32,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub sample_size: usize,
}

/// Precision, recall and F1 of `score >= threshold` as a predictor
pub fn evaluate(samples: &[(u32, bool)], threshold: u32) -> (f64, f64, f64) {
    let mut true_pos = 0u32;
    let mut false_pos = 0u32;
    let mut false_neg = 0u32;

    for &(score, actual) in samples {
        match (score >= threshold, actual) {
            (true, true) => true_pos += 1,
            (true, false) => false_pos += 1,
            (false, true) => false_neg += 1,
            (false, false) => {}
        }
    }

    let ratio = |num: u32, den: u32| if den == 0 { 0.0 } else { f64::from(num) / f64::from(den) };
    let precision = ratio(true_pos, true_pos + false_pos);
    let recall = ratio(true_pos, true_pos + false_neg);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    (precision, recall, f1)
}

/// Pick the candidate threshold with the best F1
///
/// `samples` pairs each score with whether the enrollment actually ended at
/// risk. A later candidate replaces the running best only on strictly
/// greater F1.
pub fn calibrate(samples: &[(u32, bool)]) -> CalibrationResult {
    if samples.is_empty() {
        return CalibrationResult {
            threshold: DEFAULT_THRESHOLD,
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            sample_size: 0,
        };
    }

    CANDIDATE_THRESHOLDS
        .iter()
        .map(|&threshold| {
            let (precision, recall, f1) = evaluate(samples, threshold);
            CalibrationResult {
                threshold,
                precision,
                recall,
                f1,
                sample_size: samples.len(),
            }
        })
        .reduce(|best, candidate| if candidate.f1 > best.f1 { candidate } else { best })
        .unwrap_or(CalibrationResult {
            threshold: DEFAULT_THRESHOLD,
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            sample_size: samples.len(),
        })
}
