use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::compose_id;
use crate::db::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateKind {
    /// Completion of a single course enrollment
    Course,
    /// Completion of every required course in a learning path
    Path,
    /// On-time completion of a due-dated enrollment
    Attestation,
}

/// What the certificate was issued on the strength of
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateEvidence {
    #[serde(default)]
    pub assessment_ids: Vec<String>,
    #[serde(default)]
    pub enrollment_ids: Vec<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub tenant_id: String,
    pub learner_id: String,
    pub kind: CertificateKind,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub learning_path_id: Option<String>,
    #[serde(default)]
    pub enrollment_id: Option<String>,
    pub certificate_number: String,
    pub verification_code: String,
    pub verification_url: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evidence: CertificateEvidence,
}

impl Certificate {
    /// At most one course certificate per (tenant, enrollment)
    pub fn course_doc_id(tenant_id: &str, enrollment_id: &str) -> String {
        compose_id(&[tenant_id, "course", enrollment_id])
    }

    /// At most one attestation per (tenant, enrollment)
    pub fn attestation_doc_id(tenant_id: &str, enrollment_id: &str) -> String {
        compose_id(&[tenant_id, "attestation", enrollment_id])
    }

    /// At most one path certificate per (tenant, learner, path)
    pub fn path_doc_id(tenant_id: &str, learner_id: &str, path_id: &str) -> String {
        compose_id(&[tenant_id, "path", learner_id, path_id])
    }
}

impl Document for Certificate {
    const COLLECTION: &'static str = "certificates";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
