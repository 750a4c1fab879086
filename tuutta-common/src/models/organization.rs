use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{compose_id, Channel};
use crate::db::Document;

fn default_true() -> bool {
    true
}

fn default_reminder_days() -> u32 {
    3
}

fn default_digest_roles() -> Vec<String> {
    vec![
        "team_lead".to_string(),
        "ld_manager".to_string(),
        "org_admin".to_string(),
    ]
}

/// Per-tenant notification preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default = "default_true")]
    pub in_app_enabled: bool,
    #[serde(default)]
    pub email_enabled: bool,
    #[serde(default)]
    pub push_enabled: bool,
    /// Deadline reminders and overdue notices
    #[serde(default = "default_true")]
    pub assignment_due: bool,
    #[serde(default = "default_reminder_days")]
    pub reminder_days_before: u32,
    #[serde(default)]
    pub manager_digest_enabled: bool,
    #[serde(default = "default_digest_roles")]
    pub manager_digest_roles: Vec<String>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            in_app_enabled: true,
            email_enabled: false,
            push_enabled: false,
            assignment_due: true,
            reminder_days_before: default_reminder_days(),
            manager_digest_enabled: false,
            manager_digest_roles: default_digest_roles(),
        }
    }
}

impl NotificationSettings {
    /// Channels sweep notifications go out on; never empty
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.in_app_enabled {
            channels.push(Channel::InApp);
        }
        if self.email_enabled {
            channels.push(Channel::Email);
        }
        if self.push_enabled {
            channels.push(Channel::Push);
        }
        if channels.is_empty() {
            channels.push(Channel::InApp);
        }
        channels
    }
}

/// An isolated customer organization
///
/// The tenant document's own tenant id is its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl Document for Tenant {
    const COLLECTION: &'static str = "tenants";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.id
    }
}

/// A user's membership in a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub manager_id: Option<String>,
    #[serde(default)]
    pub device_tokens: Vec<String>,
}

impl Member {
    pub fn doc_id(tenant_id: &str, user_id: &str) -> String {
        compose_id(&[tenant_id, user_id])
    }

    pub fn new(tenant_id: &str, user_id: &str, display_name: &str) -> Self {
        Self {
            id: Self::doc_id(tenant_id, user_id),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            email: None,
            role: "learner".to_string(),
            manager_id: None,
            device_tokens: Vec::new(),
        }
    }
}

impl Document for Member {
    const COLLECTION: &'static str = "members";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    /// Absent means certification is enabled
    #[serde(default)]
    pub certification_enabled: Option<bool>,
    #[serde(default)]
    pub certificate_validity_days: Option<u32>,
    #[serde(default)]
    pub module_ids: Vec<String>,
}

impl Course {
    pub fn issues_certificates(&self) -> bool {
        self.certification_enabled != Some(false)
    }
}

impl Document for Course {
    const COLLECTION: &'static str = "courses";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningPath {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    #[serde(default)]
    pub required_course_ids: Vec<String>,
    #[serde(default)]
    pub certification_enabled: Option<bool>,
}

impl LearningPath {
    pub fn issues_certificates(&self) -> bool {
        self.certification_enabled != Some(false)
    }
}

impl Document for LearningPath {
    const COLLECTION: &'static str = "learning_paths";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

/// A learner's progress through one module of a course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleProgress {
    pub id: String,
    pub tenant_id: String,
    pub learner_id: String,
    pub course_id: String,
    pub module_id: String,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document for ModuleProgress {
    const COLLECTION: &'static str = "module_progress";

    fn id(&self) -> &str {
        &self.id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
