//! Shared fixtures for tuutta-engine integration tests
//!
//! Recording stand-ins for the outbound collaborators plus an engine wired
//! over an in-memory datastore.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tuutta_common::models::{
    Course, Enrollment, EnrollmentStatus, Member, NotificationSettings, Tenant, WebhookSubscription,
};
use tuutta_common::Datastore;
use tuutta_engine::error::DeliveryError;
use tuutta_engine::notifications::{EmailSender, PushSender};
use tuutta_engine::webhooks::WebhookClient;
use tuutta_engine::{Collaborators, Engine, EngineSettings};

pub const TENANT: &str = "acme";

#[derive(Debug, Clone, PartialEq)]
pub struct SentEmail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub html: String,
}

/// Email sender that records every message and rejects empty recipient lists
#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<SentEmail>>,
}

#[async_trait]
impl EmailSender for RecordingEmail {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<(), DeliveryError> {
        if recipients.is_empty() {
            return Err(DeliveryError::Config("No recipient emails provided".to_string()));
        }
        self.sent.lock().unwrap().push(SentEmail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

impl RecordingEmail {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

/// Push sender that records every message and rejects empty token lists
#[derive(Default)]
pub struct RecordingPush {
    pub sent: Mutex<Vec<(Vec<String>, String, Value)>>,
}

#[async_trait]
impl PushSender for RecordingPush {
    async fn send(&self, tokens: &[String], title: &str, _body: &str, data: &Value) -> Result<(), DeliveryError> {
        if tokens.is_empty() {
            return Err(DeliveryError::Config("No device tokens registered".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((tokens.to_vec(), title.to_string(), data.clone()));
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Posted {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Posted {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Webhook client answering every POST with a fixed status
pub struct RecordingWebhook {
    pub posted: Mutex<Vec<Posted>>,
    pub status: Mutex<u16>,
}

impl Default for RecordingWebhook {
    fn default() -> Self {
        Self {
            posted: Mutex::new(Vec::new()),
            status: Mutex::new(200),
        }
    }
}

impl RecordingWebhook {
    pub fn respond_with(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.posted.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.posted()
            .iter()
            .filter_map(|p| p.header("X-Tuutta-Event").map(String::from))
            .collect()
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhook {
    async fn post(&self, url: &str, headers: &[(String, String)], body: &[u8]) -> Result<u16, DeliveryError> {
        self.posted.lock().unwrap().push(Posted {
            url: url.to_string(),
            headers: headers.to_vec(),
            body: body.to_vec(),
        });
        Ok(*self.status.lock().unwrap())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub email: Arc<RecordingEmail>,
    pub push: Arc<RecordingPush>,
    pub webhook: Arc<RecordingWebhook>,
}

impl Harness {
    pub fn store(&self) -> &Datastore {
        &self.engine.store
    }
}

/// Engine over an in-memory datastore with recording collaborators
pub async fn harness() -> Harness {
    let store = Datastore::in_memory().await.unwrap();
    let email = Arc::new(RecordingEmail::default());
    let push = Arc::new(RecordingPush::default());
    let webhook = Arc::new(RecordingWebhook::default());

    let collaborators = Collaborators {
        email: email.clone(),
        push: push.clone(),
        webhook: webhook.clone(),
    };
    let settings = EngineSettings {
        verification_base_url: "https://verify.test".to_string(),
        ..EngineSettings::default()
    };

    Harness {
        engine: Engine::new(store, collaborators, settings),
        email,
        push,
        webhook,
    }
}

pub fn tenant(settings: NotificationSettings) -> Tenant {
    Tenant {
        id: TENANT.to_string(),
        name: "Acme Corp".to_string(),
        notifications: settings,
    }
}

pub fn course(id: &str, title: &str) -> Course {
    Course {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        title: title.to_string(),
        certification_enabled: None,
        certificate_validity_days: None,
        module_ids: Vec::new(),
    }
}

pub fn member(user_id: &str, email: Option<&str>) -> Member {
    let mut member = Member::new(TENANT, user_id, user_id);
    member.email = email.map(String::from);
    member
}

pub fn enrollment(id: &str, learner_id: &str, course_id: &str, assigned_at: DateTime<Utc>) -> Enrollment {
    Enrollment::new(id, TENANT, learner_id, course_id, assigned_at)
}

/// Enrollment in the given status, due `due_in_days` from `now` (negative for past)
pub fn due_enrollment(
    id: &str,
    learner_id: &str,
    status: EnrollmentStatus,
    due_in_days: i64,
    now: DateTime<Utc>,
) -> Enrollment {
    let mut e = enrollment(id, learner_id, "c1", now - Duration::days(30));
    e.status = status;
    e.due_at = Some(now + Duration::days(due_in_days));
    e
}

pub fn subscription(id: &str, events: Option<Vec<&str>>, secret: Option<&str>) -> WebhookSubscription {
    WebhookSubscription {
        id: id.to_string(),
        tenant_id: TENANT.to_string(),
        url: format!("https://hooks.example.test/{}", id),
        secret: secret.map(String::from),
        enabled: true,
        events: events.map(|list| list.into_iter().map(String::from).collect()),
        headers: BTreeMap::new(),
    }
}
