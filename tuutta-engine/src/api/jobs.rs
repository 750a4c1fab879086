//! Manual job triggers
//!
//! Failures answer with a generic error body; the detail is recorded as a
//! system error and kept as the service's last error.

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tuutta_common::models::DeliveryOutcome;

use crate::audit::record_system_error;
use crate::error::{ApiError, ApiResult};
use crate::risk::RunOutcome;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct WebhookTestResponse {
    pub status: String,
    pub deliveries: usize,
    pub succeeded: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeliveryResponse {
    pub status: String,
    pub delivery_id: String,
    pub attempt: u32,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub status: String,
    pub sent: usize,
    pub failed: usize,
}

async fn job_failed(state: &AppState, tenant_id: &str, job: &str, message: String) -> ApiError {
    record_system_error(&state.engine.store, tenant_id, job, message.clone(), json!({ "trigger": "manual" })).await;
    *state.last_error.write().await = Some(format!("{}: {}", job, message));
    ApiError::Internal(format!("{} failed", job))
}

/// POST /api/tenants/:tenant_id/analytics/recalculate
pub async fn recalculate_analytics(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    info!(tenant_id = %tenant_id, "Manual analytics recalculation requested");

    match state.engine.risk.run_tenant(&tenant_id, Utc::now()).await {
        Ok(RunOutcome::Completed(_)) => Ok(Json(StatusResponse { status: "ok".into() })),
        Ok(RunOutcome::AlreadyRunning) => Ok(Json(StatusResponse {
            status: "already_running".into(),
        })),
        Err(e) => Err(job_failed(&state, &tenant_id, "risk_scoring", e.to_string()).await),
    }
}

/// POST /api/tenants/:tenant_id/webhooks/test
pub async fn send_test_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<WebhookTestResponse>> {
    match state.engine.webhooks.send_test(&tenant_id).await {
        Ok(deliveries) => Ok(Json(WebhookTestResponse {
            status: "ok".into(),
            deliveries: deliveries.len(),
            succeeded: deliveries
                .iter()
                .filter(|d| d.outcome == DeliveryOutcome::Success)
                .count(),
        })),
        Err(e) => Err(job_failed(&state, &tenant_id, "webhook_test", e.to_string()).await),
    }
}

/// POST /api/webhooks/deliveries/:delivery_id/redeliver
pub async fn redeliver_webhook(
    State(state): State<AppState>,
    Path(delivery_id): Path<String>,
) -> ApiResult<Json<RedeliveryResponse>> {
    match state.engine.webhooks.redeliver(&delivery_id).await {
        Ok(delivery) => Ok(Json(RedeliveryResponse {
            status: "ok".into(),
            delivery_id: delivery.id,
            attempt: delivery.attempt,
            outcome: delivery.outcome,
        })),
        Err(e @ (tuutta_common::Error::NotFound(_) | tuutta_common::Error::InvalidInput(_))) => Err(e.into()),
        Err(e) => Err(job_failed(&state, "-", "webhook_redeliver", e.to_string()).await),
    }
}

/// POST /api/notifications/dispatch
pub async fn dispatch_notifications(State(state): State<AppState>) -> ApiResult<Json<DispatchResponse>> {
    match state.engine.notifications.dispatch_pending().await {
        Ok(report) => Ok(Json(DispatchResponse {
            status: "ok".into(),
            sent: report.sent,
            failed: report.failed,
        })),
        Err(e) => Err(job_failed(&state, "-", "notification_dispatch", e.to_string()).await),
    }
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/tenants/:tenant_id/analytics/recalculate",
            post(recalculate_analytics),
        )
        .route("/api/tenants/:tenant_id/webhooks/test", post(send_test_webhook))
        .route(
            "/api/webhooks/deliveries/:delivery_id/redeliver",
            post(redeliver_webhook),
        )
        .route("/api/notifications/dispatch", post(dispatch_notifications))
}
