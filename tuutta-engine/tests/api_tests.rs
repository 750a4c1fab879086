//! HTTP API Integration Tests
//! Test File: api_tests.rs

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use tuutta_common::models::{
    Channel, DeliveryOutcome, EnrollmentStatus, NotificationSettings, RiskScore, SystemError, WebhookDelivery,
};
use tuutta_common::Query;
use tuutta_engine::notifications::{enqueue_notification, NewNotification};
use tuutta_engine::{build_router, AppState};

use common::{due_enrollment, harness, member, subscription, tenant, Harness, TENANT};

fn test_app(h: &Harness) -> Router {
    build_router(AppState::new(Arc::new(h.engine.clone())))
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// TC-API-001: Health reports module identity
/// **Type:** Integration Test | **Priority:** P0
#[tokio::test]
async fn tc_api_001_health() {
    let h = harness().await;
    let app = test_app(&h);

    let (status, body) = send(app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tuutta-engine");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["git_hash"], env!("GIT_HASH"));
    assert!(!body["git_hash"].as_str().unwrap().is_empty());
    assert!(body.get("last_error").is_none());
}

/// TC-API-002: Manual recalculation scores the tenant
/// **Type:** Integration Test | **Priority:** P0
#[tokio::test]
async fn tc_api_002_recalculate() {
    // Given: A tenant with one overdue enrollment
    let h = harness().await;
    let now = chrono::Utc::now();
    h.store().create(&tenant(NotificationSettings::default())).await.unwrap();
    h.store()
        .create(&due_enrollment("e1", "u1", EnrollmentStatus::Overdue, -5, now))
        .await
        .unwrap();
    let app = test_app(&h);

    // When: Recalculation is triggered
    let (status, body) = send(app, "POST", "/api/tenants/acme/analytics/recalculate").await;

    // Then: ok, and the score exists
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
    let score: Option<RiskScore> = h.store().get(&RiskScore::doc_id(TENANT, "e1")).await.unwrap();
    assert!(score.is_some());
}

/// TC-API-003: Failing job answers 500 and is remembered
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_api_003_job_failure_recorded() {
    // Given: An enrollment row that cannot be decoded
    let h = harness().await;
    sqlx::query(
        "INSERT INTO documents (collection, id, tenant_id, body, created_at, updated_at) \
         VALUES ('enrollments', 'broken', ?, '{\"id\":\"broken\"}', 0, 0)",
    )
    .bind(TENANT)
    .execute(h.store().pool())
    .await
    .unwrap();
    let router = test_app(&h);

    // When: Recalculation is triggered
    let (status, body) = send(router.clone(), "POST", "/api/tenants/acme/analytics/recalculate").await;

    // Then: Generic 500 body, detail kept as a system error and on /health
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert_eq!(body["error"]["message"], "risk_scoring failed");

    let errors: Vec<SystemError> = h.store().query(&Query::tenant(TENANT)).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].job, "risk_scoring");
    assert_eq!(errors[0].context["trigger"], "manual");

    let (_, health) = send(router, "GET", "/health").await;
    assert!(health["last_error"].as_str().unwrap().starts_with("risk_scoring: "));
}

/// TC-API-004: Test webhook reports delivery counts
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_api_004_webhook_test() {
    let h = harness().await;
    h.store().create(&subscription("s1", None, None)).await.unwrap();
    h.store().create(&subscription("s2", None, None)).await.unwrap();
    h.webhook.respond_with(204);
    let app = test_app(&h);

    let (status, body) = send(app, "POST", "/api/tenants/acme/webhooks/test").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "deliveries": 2, "succeeded": 2 }));
}

/// TC-API-005: Redelivery answers with the new attempt
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_api_005_redeliver() {
    // Given: A failed delivery
    let h = harness().await;
    h.store().create(&subscription("s1", None, None)).await.unwrap();
    h.webhook.respond_with(500);
    h.engine.webhooks.send_test(TENANT).await.unwrap();
    let first: WebhookDelivery = h
        .store()
        .find_one(&Query::tenant(TENANT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.outcome, DeliveryOutcome::Failed);
    h.webhook.respond_with(200);
    let router = test_app(&h);

    // When: It is redelivered over HTTP
    let uri = format!("/api/webhooks/deliveries/{}/redeliver", first.id);
    let (status, body) = send(router.clone(), "POST", &uri).await;

    // Then: Attempt 2 succeeded
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["attempt"], 2);
    assert_eq!(body["outcome"], "success");
    assert_ne!(body["deliveryId"], first.id.as_str());

    // And: Unknown ids are 404
    let (status, body) = send(router, "POST", "/api/webhooks/deliveries/nope/redeliver").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

/// TC-API-006: Manual dispatch drains pending notifications
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_api_006_dispatch() {
    let h = harness().await;
    h.store().create(&member("u1", Some("u1@acme.test"))).await.unwrap();
    for recipient in ["u1", "ghost"] {
        enqueue_notification(
            h.store(),
            NewNotification::new(TENANT, recipient, "course_completed", "Course completed", "Done.")
                .with_channels(vec![Channel::Email]),
        )
        .await
        .unwrap();
    }
    let app = test_app(&h);

    let (status, body) = send(app, "POST", "/api/notifications/dispatch").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "sent": 1, "failed": 1 }));
}

/// TC-API-007: Unknown routes are 404
/// **Type:** Integration Test | **Priority:** P2
#[tokio::test]
async fn tc_api_007_unknown_route() {
    let h = harness().await;
    let app = test_app(&h);

    let (status, _) = send(app, "GET", "/api/nothing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
