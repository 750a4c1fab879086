//! Email & Push Provider Tests
//! Test File: delivery_tests.rs
//!
//! Provider clients against a local wiremock server.

use serde_json::json;
use tuutta_engine::error::DeliveryError;
use tuutta_engine::notifications::{EmailSender, HttpPushSender, PushSender, SendGridEmailSender};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// TC-DLV-001: SendGrid request carries key, sender and recipients
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_dlv_001_sendgrid_request_shape() {
    // Given: A SendGrid stand-in expecting one well-formed message
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/mail/send"))
        .and(header("authorization", "Bearer SG.key"))
        .and(body_partial_json(json!({
            "personalizations": [{ "to": [{ "email": "u1@acme.test" }] }],
            "from": { "email": "training@acme.test", "name": "Acme Training" },
            "subject": "Training due soon",
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let sender = SendGridEmailSender::new(
        Some("SG.key".to_string()),
        "training@acme.test".to_string(),
        Some("Acme Training".to_string()),
    )
    .unwrap()
    .with_endpoint(format!("{}/v3/mail/send", server.uri()));

    // When: A message is sent
    let result = sender
        .send(&["u1@acme.test".to_string()], "Training due soon", "<p>Due Friday.</p>")
        .await;

    // Then: Accepted
    assert!(result.is_ok(), "{:?}", result);
}

/// TC-DLV-002: SendGrid rejection surfaces status and body
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_dlv_002_sendgrid_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let sender = SendGridEmailSender::new(Some("SG.wrong".to_string()), "noreply@tuutta.com".to_string(), None)
        .unwrap()
        .with_endpoint(server.uri());

    let result = sender.send(&["u1@acme.test".to_string()], "Hi", "<p>Hi</p>").await;

    assert_eq!(
        result,
        Err(DeliveryError::Provider {
            status: 401,
            message: "bad key".to_string()
        })
    );
}

/// TC-DLV-003: Push gateway receives tokens and data
/// **Type:** Integration Test | **Priority:** P1
#[tokio::test]
async fn tc_dlv_003_push_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push"))
        .and(header("authorization", "Bearer push-key"))
        .and(body_partial_json(json!({
            "tokens": ["tok-1"],
            "title": "You are at risk",
            "data": { "type": "risk_alert" },
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sender = HttpPushSender::new(Some(format!("{}/push", server.uri())), Some("push-key".to_string())).unwrap();

    let result = sender
        .send(
            &["tok-1".to_string()],
            "You are at risk",
            "Catch up.",
            &json!({ "type": "risk_alert" }),
        )
        .await;

    assert!(result.is_ok(), "{:?}", result);
}

/// TC-DLV-004: Push gateway errors are provider errors
/// **Type:** Integration Test | **Priority:** P2
#[tokio::test]
async fn tc_dlv_004_push_gateway_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let sender = HttpPushSender::new(Some(server.uri()), None).unwrap();
    let result = sender.send(&["tok-1".to_string()], "t", "b", &json!({})).await;

    assert!(matches!(result, Err(DeliveryError::Provider { status: 503, .. })));
}
