//! tuutta-engine library interface
//!
//! The compliance risk and automation engine: guarded writes for
//! progress-bearing records, risk scoring, certificate issuance, and the
//! notification and webhook fan-out that follows state changes.

pub mod api;
pub mod audit;
pub mod certificates;
pub mod config;
pub mod documents;
pub mod error;
pub mod fanout;
pub mod guard;
pub mod notifications;
pub mod outbox;
pub mod risk;
pub mod scheduler;
pub mod sweeps;
pub mod utils;
pub mod webhooks;

pub use crate::error::{ApiError, ApiResult};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tuutta_common::events::EventBus;
use tuutta_common::Datastore;

use certificates::CertificateIssuer;
use documents::DocumentService;
use fanout::FanoutRouter;
use notifications::{EmailSender, NotificationDispatcher, PushSender};
use outbox::Outbox;
use risk::RiskEngine;
use sweeps::Sweeps;
use webhooks::{WebhookClient, WebhookDispatcher};

/// Capacity of the in-process event bus
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Outbound integrations the engine delivers through
#[derive(Clone)]
pub struct Collaborators {
    pub email: Arc<dyn EmailSender>,
    pub push: Arc<dyn PushSender>,
    pub webhook: Arc<dyn WebhookClient>,
}

/// Settings that shape engine behavior (as opposed to process setup)
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub verification_base_url: String,
    pub notification_batch_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            verification_base_url: certificates::DEFAULT_VERIFICATION_BASE_URL.to_string(),
            notification_batch_size: notifications::dispatcher::DEFAULT_BATCH_SIZE,
        }
    }
}

/// Every engine component, wired over one datastore
#[derive(Clone)]
pub struct Engine {
    pub store: Datastore,
    pub event_bus: Arc<EventBus>,
    pub outbox: Outbox,
    pub documents: DocumentService,
    pub risk: RiskEngine,
    pub certificates: CertificateIssuer,
    pub notifications: NotificationDispatcher,
    pub webhooks: WebhookDispatcher,
    pub sweeps: Sweeps,
    pub fanout: FanoutRouter,
}

impl Engine {
    pub fn new(store: Datastore, collaborators: Collaborators, settings: EngineSettings) -> Self {
        let event_bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        let outbox = Outbox::new(store.clone(), Arc::clone(&event_bus));
        let documents = DocumentService::new(store.clone(), outbox.clone());
        let certificates =
            CertificateIssuer::new(store.clone(), outbox.clone(), settings.verification_base_url);
        let notifications = NotificationDispatcher::new(store.clone(), collaborators.email, collaborators.push)
            .with_batch_size(settings.notification_batch_size);
        let webhooks = WebhookDispatcher::new(store.clone(), collaborators.webhook);
        let fanout = FanoutRouter::new(store.clone(), outbox.clone(), certificates.clone(), webhooks.clone());

        Self {
            risk: RiskEngine::new(store.clone()),
            sweeps: Sweeps::new(store.clone(), documents.clone()),
            store,
            event_bus,
            outbox,
            documents,
            certificates,
            notifications,
            webhooks,
            fanout,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last manual-job failure, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::job_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
