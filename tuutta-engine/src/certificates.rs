//! Certificate and attestation issuance
//!
//! Issuance runs when an enrollment reaches `completed`. Certificate ids are
//! derived from the issuance key, so `create_if_absent` makes every kind of
//! issuance at-most-once no matter how often the completion is handled.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::json;
use tracing::{debug, info};
use tuutta_common::events::DomainEvent;
use tuutta_common::models::{
    AssessmentResult, Certificate, CertificateEvidence, CertificateKind, Course, Enrollment,
    EnrollmentStatus, LearningPath,
};
use tuutta_common::{Datastore, Query, Result};

use crate::outbox::Outbox;

pub const DEFAULT_VERIFICATION_BASE_URL: &str = "https://app.tuutta.com";

const VERIFICATION_CODE_LEN: usize = 12;

/// Which certificates a single completion produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssuanceReport {
    pub course: Option<Certificate>,
    pub attestation: Option<Certificate>,
    pub path: Option<Certificate>,
}

impl IssuanceReport {
    pub fn issued_count(&self) -> usize {
        [&self.course, &self.attestation, &self.path]
            .iter()
            .filter(|c| c.is_some())
            .count()
    }
}

#[derive(Clone)]
pub struct CertificateIssuer {
    store: Datastore,
    outbox: Outbox,
    verification_base_url: String,
}

impl CertificateIssuer {
    pub fn new(store: Datastore, outbox: Outbox, verification_base_url: impl Into<String>) -> Self {
        let base: String = verification_base_url.into();
        Self {
            store,
            outbox,
            verification_base_url: base.trim_end_matches('/').to_string(),
        }
    }

    /// Issue whatever the completion of `enrollment_id` entitles the learner to
    pub async fn on_enrollment_completed(&self, enrollment_id: &str) -> Result<IssuanceReport> {
        let mut report = IssuanceReport::default();

        let Some(enrollment) = self.store.get::<Enrollment>(enrollment_id).await? else {
            debug!(enrollment_id, "Completed enrollment no longer exists");
            return Ok(report);
        };
        if enrollment.status != EnrollmentStatus::Completed || enrollment.certificate_id.is_some() {
            return Ok(report);
        }

        let course: Option<Course> = self.store.get(&enrollment.course_id).await?;
        if course.as_ref().is_some_and(|c| !c.issues_certificates()) {
            debug!(
                enrollment_id,
                course_id = %enrollment.course_id,
                "Certification disabled for course"
            );
            return Ok(report);
        }

        let assessments: Vec<AssessmentResult> = self
            .store
            .query(&Query::tenant(&enrollment.tenant_id).eq("enrollmentId", enrollment.id.as_str()))
            .await?;

        let now = Utc::now();
        let evidence = CertificateEvidence {
            assessment_ids: assessments.iter().map(|a| a.id.clone()).collect(),
            enrollment_ids: vec![enrollment.id.clone()],
            progress: enrollment.progress,
            score: assessments.iter().map(|a| a.score).reduce(f64::max),
        };
        let expires_at = expiry(course.as_ref(), &assessments, now);

        // Course certificate
        let certificate = self.mint(
            Certificate::course_doc_id(&enrollment.tenant_id, &enrollment.id),
            CertificateKind::Course,
            &enrollment,
            now,
            expires_at,
            evidence.clone(),
        );
        let certificate_id = certificate.id.clone();
        if self.store.create_if_absent(&certificate).await? {
            self.announce(&certificate).await?;
            report.course = Some(certificate);
        }
        self.store
            .merge_update::<Enrollment>(&enrollment.id, &json!({ "certificateId": certificate_id }))
            .await?;

        // Attestation for on-time completion
        if enrollment.completed_on_time() && !enrollment.attestation_issued {
            let attestation = self.mint(
                Certificate::attestation_doc_id(&enrollment.tenant_id, &enrollment.id),
                CertificateKind::Attestation,
                &enrollment,
                now,
                expires_at,
                evidence,
            );
            if self.store.create_if_absent(&attestation).await? {
                self.announce(&attestation).await?;
                report.attestation = Some(attestation);
            }
            self.store
                .merge_update::<Enrollment>(&enrollment.id, &json!({ "attestationIssued": true }))
                .await?;
        }

        if let Some(path_id) = enrollment.learning_path_id.as_deref() {
            report.path = self.issue_path_certificate(&enrollment, path_id, now).await?;
        }

        if report.issued_count() > 0 {
            info!(
                tenant_id = %enrollment.tenant_id,
                enrollment_id = %enrollment.id,
                issued = report.issued_count(),
                "Certificates issued"
            );
        }
        Ok(report)
    }

    /// Re-run issuance for completed enrollments still lacking a certificate
    pub async fn issue_missing_certificates(&self, tenant_id: &str) -> Result<usize> {
        let orphans: Vec<Enrollment> = self
            .store
            .query(
                &Query::tenant(tenant_id)
                    .eq("status", EnrollmentStatus::Completed.as_str())
                    .is_null("certificateId"),
            )
            .await?;

        let mut issued = 0;
        for enrollment in orphans {
            issued += self.on_enrollment_completed(&enrollment.id).await?.issued_count();
        }

        if issued > 0 {
            info!(tenant_id, issued, "Reconciled missing certificates");
        }
        Ok(issued)
    }

    async fn issue_path_certificate(
        &self,
        enrollment: &Enrollment,
        path_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Certificate>> {
        let Some(path) = self.store.get::<LearningPath>(path_id).await? else {
            return Ok(None);
        };
        if !path.issues_certificates() || path.required_course_ids.is_empty() {
            return Ok(None);
        }

        let completed: Vec<Enrollment> = self
            .store
            .query(
                &Query::tenant(&enrollment.tenant_id)
                    .eq("learnerId", enrollment.learner_id.as_str())
                    .eq("status", EnrollmentStatus::Completed.as_str())
                    .is_in("courseId", path.required_course_ids.iter()),
            )
            .await?;

        let all_done = path
            .required_course_ids
            .iter()
            .all(|course_id| completed.iter().any(|e| &e.course_id == course_id));
        if !all_done {
            return Ok(None);
        }

        let evidence = CertificateEvidence {
            assessment_ids: Vec::new(),
            enrollment_ids: completed.iter().map(|e| e.id.clone()).collect(),
            progress: 100.0,
            score: None,
        };
        let mut certificate = self.mint(
            Certificate::path_doc_id(&enrollment.tenant_id, &enrollment.learner_id, &path.id),
            CertificateKind::Path,
            enrollment,
            now,
            None,
            evidence,
        );
        certificate.course_id = None;
        certificate.enrollment_id = None;
        certificate.learning_path_id = Some(path.id.clone());

        if self.store.create_if_absent(&certificate).await? {
            self.announce(&certificate).await?;
            Ok(Some(certificate))
        } else {
            Ok(None)
        }
    }

    fn mint(
        &self,
        id: String,
        kind: CertificateKind,
        enrollment: &Enrollment,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        evidence: CertificateEvidence,
    ) -> Certificate {
        let verification_code = verification_code();
        Certificate {
            id,
            tenant_id: enrollment.tenant_id.clone(),
            learner_id: enrollment.learner_id.clone(),
            kind,
            course_id: Some(enrollment.course_id.clone()),
            learning_path_id: enrollment.learning_path_id.clone(),
            enrollment_id: Some(enrollment.id.clone()),
            certificate_number: certificate_number(kind),
            verification_url: format!("{}/verify/{}", self.verification_base_url, verification_code),
            verification_code,
            issued_at,
            expires_at,
            evidence,
        }
    }

    async fn announce(&self, certificate: &Certificate) -> Result<()> {
        self.outbox
            .append(DomainEvent::CertificateIssued {
                tenant_id: certificate.tenant_id.clone(),
                certificate_id: certificate.id.clone(),
                learner_id: certificate.learner_id.clone(),
                kind: certificate.kind,
                timestamp: certificate.issued_at,
            })
            .await?;
        Ok(())
    }
}

/// `CERT-`, `ATT-` or `PATH-` followed by 12 uppercase hex digits
pub fn certificate_number(kind: CertificateKind) -> String {
    let prefix = match kind {
        CertificateKind::Course => "CERT",
        CertificateKind::Attestation => "ATT",
        CertificateKind::Path => "PATH",
    };
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, hex[..12].to_uppercase())
}

fn verification_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFICATION_CODE_LEN)
        .map(char::from)
        .collect()
}

/// Course validity wins; otherwise the longest recertification window of
/// the linked assessments
fn expiry(course: Option<&Course>, assessments: &[AssessmentResult], issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let days = course
        .and_then(|c| c.certificate_validity_days)
        .or_else(|| {
            assessments
                .iter()
                .filter_map(|a| a.metadata.recertification_days)
                .max()
        })?;
    Some(issued_at + Duration::days(i64::from(days)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_number_format() {
        let number = certificate_number(CertificateKind::Course);
        assert!(number.starts_with("CERT-"));
        assert_eq!(number.len(), "CERT-".len() + 12);
        assert!(number[5..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));

        assert!(certificate_number(CertificateKind::Attestation).starts_with("ATT-"));
        assert!(certificate_number(CertificateKind::Path).starts_with("PATH-"));
    }

    #[test]
    fn test_verification_code_is_alphanumeric() {
        let code = verification_code();
        assert_eq!(code.len(), VERIFICATION_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_expiry_prefers_course_validity() {
        let now = Utc::now();
        let course = Course {
            id: "c1".into(),
            tenant_id: "t1".into(),
            title: "Safety".into(),
            certification_enabled: None,
            certificate_validity_days: Some(365),
            module_ids: Vec::new(),
        };

        assert_eq!(expiry(Some(&course), &[], now), Some(now + Duration::days(365)));
        assert_eq!(expiry(None, &[], now), None);
    }
}
