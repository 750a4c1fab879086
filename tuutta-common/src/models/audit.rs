use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::Document;

/// Record of a notable state change or a blocked transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub tenant_id: String,
    pub actor_id: String,
    /// `system`, `user` or `admin`
    pub actor_type: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub changes: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Entry attributed to the engine itself
    pub fn system(
        tenant_id: &str,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        changes: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            actor_id: "system".to_string(),
            actor_type: "system".to_string(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            changes,
            created_at: Utc::now(),
        }
    }
}

impl Document for AuditLogEntry {
    const COLLECTION: &'static str = "audit_logs";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

/// Caught failure with enough context to retry manually
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemError {
    pub id: String,
    pub tenant_id: String,
    pub job: String,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl SystemError {
    pub fn new(tenant_id: &str, job: &str, message: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            job: job.to_string(),
            message: message.into(),
            context,
            created_at: Utc::now(),
        }
    }
}

impl Document for SystemError {
    const COLLECTION: &'static str = "system_errors";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
