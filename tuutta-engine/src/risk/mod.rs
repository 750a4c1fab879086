//! Risk scoring, calibration and the analytics that ride along with it
//!
//! A run for one tenant loads that tenant's records, scores every
//! enrollment, calibrates the high-risk threshold against enrollments whose
//! outcome is known, and then replaces the tenant's risk scores,
//! calibration, analytics and recommendations. Nothing is written until all
//! of that has been computed, and every write replaces rather than appends,
//! so a run can be repeated at will.

pub mod analytics;
pub mod calibration;
pub mod recommendations;
pub mod scoring;

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};
use tuutta_common::models::{
    AssessmentResult, Course, Enrollment, Member, ModuleProgress, Recommendation, RiskLevel,
    RiskModelCalibration, RiskScore, Tenant,
};
use tuutta_common::{Datastore, Error, Query, Result};

use crate::audit::record_system_error;
use crate::notifications::enqueue_unique;
use calibration::{calibrate, is_calibration_sample, was_at_risk, CalibrationResult};
use recommendations::{build_recommendations, RecommendationInputs};
use scoring::{classify, learner_completion_rates, score_enrollment};

const JOB_NAME: &str = "risk_scoring";

/// What one tenant run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRunReport {
    pub tenant_id: String,
    pub scored: usize,
    pub high: usize,
    pub medium: usize,
    pub calibration: CalibrationResult,
    pub recommendations: usize,
    pub notifications: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(RiskRunReport),
    /// Another run for the tenant holds the lease
    AlreadyRunning,
}

/// Summary of a sweep over every tenant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct RiskEngine {
    store: Datastore,
    leases: Arc<Mutex<HashSet<String>>>,
}

/// Holds a tenant's lease until dropped
struct Lease {
    leases: Arc<Mutex<HashSet<String>>>,
    tenant_id: String,
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Ok(mut held) = self.leases.lock() {
            held.remove(&self.tenant_id);
        }
    }
}

impl RiskEngine {
    pub fn new(store: Datastore) -> Self {
        Self {
            store,
            leases: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn try_lease(&self, tenant_id: &str) -> Result<Option<Lease>> {
        let mut held = self
            .leases
            .lock()
            .map_err(|_| Error::Internal("risk lease table poisoned".to_string()))?;
        if !held.insert(tenant_id.to_string()) {
            return Ok(None);
        }
        Ok(Some(Lease {
            leases: Arc::clone(&self.leases),
            tenant_id: tenant_id.to_string(),
        }))
    }

    /// Score one tenant, unless a run for it is already in progress
    pub async fn run_tenant(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<RunOutcome> {
        let Some(_lease) = self.try_lease(tenant_id)? else {
            warn!(tenant_id, "Risk scoring already running for tenant, skipping");
            return Ok(RunOutcome::AlreadyRunning);
        };

        let report = self.score_tenant(tenant_id, now).await?;
        info!(
            tenant_id,
            scored = report.scored,
            high = report.high,
            medium = report.medium,
            threshold = report.calibration.threshold,
            f1 = report.calibration.f1,
            "Risk scoring completed"
        );
        Ok(RunOutcome::Completed(report))
    }

    /// Score every tenant; one tenant's failure does not stop the others
    pub async fn run_all(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for tenant_id in known_tenants(&self.store).await? {
            match self.run_tenant(&tenant_id, now).await {
                Ok(RunOutcome::Completed(_)) => report.completed += 1,
                Ok(RunOutcome::AlreadyRunning) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    record_system_error(&self.store, &tenant_id, JOB_NAME, e.to_string(), json!({})).await;
                }
            }
        }

        Ok(report)
    }

    async fn score_tenant(&self, tenant_id: &str, now: DateTime<Utc>) -> Result<RiskRunReport> {
        let scope = Query::tenant(tenant_id).insertion_order();
        let enrollments: Vec<Enrollment> = self.store.query(&scope).await?;
        let assessments: Vec<AssessmentResult> = self.store.query(&scope).await?;
        let members: Vec<Member> = self.store.query(&scope).await?;
        let courses: Vec<Course> = self.store.query(&scope).await?;
        let module_progress: Vec<ModuleProgress> = self.store.query(&scope).await?;
        let tenant: Option<Tenant> = self.store.get(tenant_id).await?;
        let channels = tenant.map(|t| t.notifications).unwrap_or_default().channels();

        let rates = learner_completion_rates(&enrollments);
        let raw: Vec<(u32, Vec<String>)> = enrollments
            .iter()
            .map(|e| score_enrollment(e, rates.get(e.learner_id.as_str()).copied(), now))
            .collect();

        let samples: Vec<(u32, bool)> = enrollments
            .iter()
            .zip(&raw)
            .filter(|(e, _)| is_calibration_sample(e))
            .map(|(e, (score, _))| (*score, was_at_risk(e.status)))
            .collect();
        let calibration = calibrate(&samples);

        let scores: Vec<RiskScore> = enrollments
            .iter()
            .zip(raw)
            .map(|(e, (score, reasons))| RiskScore {
                id: RiskScore::doc_id(tenant_id, &e.id),
                tenant_id: tenant_id.to_string(),
                enrollment_id: e.id.clone(),
                learner_id: e.learner_id.clone(),
                course_id: e.course_id.clone(),
                score,
                level: classify(score, calibration.threshold),
                reasons,
                computed_at: now,
            })
            .collect();

        let summary = analytics::compute_summary(tenant_id, &enrollments, &assessments, &module_progress, &scores, now);
        let snapshot = analytics::compliance_snapshot(&summary, calibration.threshold);

        let generated = build_recommendations(&RecommendationInputs {
            tenant_id,
            summary: &summary,
            scores: &scores,
            enrollments: &enrollments,
            members: &members,
            courses: &courses,
            channels: &channels,
            now,
        });

        // Commit
        self.store
            .set(&RiskModelCalibration {
                id: tenant_id.to_string(),
                tenant_id: tenant_id.to_string(),
                threshold: calibration.threshold,
                precision: calibration.precision,
                recall: calibration.recall,
                f1: calibration.f1,
                sample_size: calibration.sample_size,
                trained_at: now,
            })
            .await?;
        self.store.replace_tenant(tenant_id, &scores).await?;
        self.store.set(&summary).await?;
        self.store.set(&snapshot).await?;
        self.store
            .replace_tenant::<Recommendation>(tenant_id, &generated.recommendations)
            .await?;

        let mut notifications = 0;
        for notification in generated.notifications {
            if enqueue_unique(&self.store, notification, now).await?.is_some() {
                notifications += 1;
            }
        }

        Ok(RiskRunReport {
            tenant_id: tenant_id.to_string(),
            scored: scores.len(),
            high: scores.iter().filter(|s| s.level == RiskLevel::High).count(),
            medium: scores.iter().filter(|s| s.level == RiskLevel::Medium).count(),
            calibration,
            recommendations: generated.recommendations.len(),
            notifications,
        })
    }
}

/// Tenants with a tenant record or at least one enrollment
pub async fn known_tenants(store: &Datastore) -> Result<Vec<String>> {
    let mut tenants: BTreeSet<String> = store.tenant_ids::<Tenant>().await?.into_iter().collect();
    tenants.extend(store.tenant_ids::<Enrollment>().await?);
    Ok(tenants.into_iter().collect())
}
