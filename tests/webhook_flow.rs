//! Signed gateway callbacks through `POST /webhooks/circoflows`.
//!
//! Every payload is HMAC-signed with the same secret the app state
//! carries; the negative cases prove the endpoint fails closed.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use pexipay_core::fees::{FeeSchedule, StaticScheduleProvider};
use pexipay_core::fraud::AllowAllScorer;
use pexipay_core::gateway::{Gateway, RetryPolicy, SandboxGateway};
use pexipay_core::handlers::MERCHANT_ID_HEADER;
use pexipay_core::merchants::StaticMerchantDirectory;
use pexipay_core::services::{PaymentService, ServiceConfig, SettlementAggregator};
use pexipay_core::store::MemoryPaymentStore;
use pexipay_core::webhook::{WebhookVerifier, SIGNATURE_HEADER};
use pexipay_core::{create_app, AppState};

const SECRET: &str = "whsec_flow_tests";

struct TestApp {
    app: Router,
    merchant_id: Uuid,
    verifier: WebhookVerifier,
}

fn sandbox_app() -> TestApp {
    let store = Arc::new(MemoryPaymentStore::new());
    let gateway = Gateway::Sandbox(SandboxGateway::new());
    let directory = Arc::new(StaticMerchantDirectory::sandbox());
    let merchant_id = directory.merchants[0].id;

    let payments = Arc::new(PaymentService::new(
        store.clone(),
        gateway,
        directory.clone(),
        Arc::new(AllowAllScorer),
        Arc::new(StaticScheduleProvider::new(FeeSchedule::platform_default())),
        ServiceConfig {
            retry: RetryPolicy::new(3, std::time::Duration::from_millis(1)),
            three_ds_ttl: chrono::Duration::minutes(15),
            app_url: Some("https://pay.example.test".to_string()),
        },
    ));
    let settlements = Arc::new(SettlementAggregator::new(store, directory.clone()));

    let app = create_app(AppState {
        payments,
        settlements,
        merchants: directory,
        webhook_verifier: Arc::new(WebhookVerifier::new(SECRET)),
        db: None,
    });

    TestApp {
        app,
        merchant_id,
        verifier: WebhookVerifier::new(SECRET),
    }
}

/// Creates a hosted payment and returns `(transaction_id, gateway_payment_id)`.
/// Hosted payments sit in PROCESSING until a webhook lands, which makes
/// them the natural subject here.
async fn processing_payment(harness: &TestApp) -> (String, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/payments")
        .header(MERCHANT_ID_HEADER, harness.merchant_id.to_string())
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "amount": "100.00", "currency": "USD" }).to_string(),
        ))
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let id = body["transactionId"].as_str().unwrap().to_string();

    let view = fetch(harness, &id).await;
    let gateway_id = view["gatewayPaymentId"].as_str().unwrap().to_string();
    (id, gateway_id)
}

async fn fetch(harness: &TestApp, id: &str) -> Value {
    let request = Request::builder()
        .method("GET")
        .uri(format!("/payments/{}", id))
        .header(MERCHANT_ID_HEADER, harness.merchant_id.to_string())
        .body(Body::empty())
        .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn deliver(app: &Router, payload: &str, signature: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/circoflows")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let request = builder.body(Body::from(payload.to_string())).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn missing_signature_is_unauthorized() {
    let harness = sandbox_app();
    let payload = json!({ "event": "payment.captured", "payment_id": "sb_x" }).to_string();

    let (status, body) = deliver(&harness.app, &payload, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Signature verification failed"));
}

#[tokio::test]
async fn forged_signature_changes_nothing() {
    let harness = sandbox_app();
    let (id, gateway_id) = processing_payment(&harness).await;

    let payload = json!({
        "event": "payment.captured",
        "payment_id": gateway_id,
        "status": "completed",
    })
    .to_string();
    let forged = "0".repeat(64);

    let (status, _) = deliver(&harness.app, &payload, Some(&forged)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let view = fetch(&harness, &id).await;
    assert_eq!(view["status"], "PROCESSING");
}

#[tokio::test]
async fn signed_capture_event_succeeds_the_payment() {
    let harness = sandbox_app();
    let (id, gateway_id) = processing_payment(&harness).await;

    let payload = json!({
        "event": "payment.captured",
        "payment_id": gateway_id,
        "status": "completed",
        "amount": "100.00",
        "currency": "USD",
    })
    .to_string();
    let signature = harness.verifier.sign(payload.as_bytes());

    let (status, body) = deliver(&harness.app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["transactionId"], id);
    assert_eq!(body["status"], "SUCCEEDED");

    let view = fetch(&harness, &id).await;
    assert_eq!(view["status"], "SUCCEEDED");
    assert!(view["processedAt"].is_string());
}

#[tokio::test]
async fn redelivered_event_is_acknowledged_without_reapplying() {
    let harness = sandbox_app();
    let (id, gateway_id) = processing_payment(&harness).await;

    let payload = json!({
        "event": "payment.captured",
        "payment_id": gateway_id,
        "status": "completed",
    })
    .to_string();
    let signature = harness.verifier.sign(payload.as_bytes());

    deliver(&harness.app, &payload, Some(&signature)).await;
    let settled = fetch(&harness, &id).await;

    let (status, body) = deliver(&harness.app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["ignored"], "event already applied");

    // Redelivery left the record untouched.
    let view = fetch(&harness, &id).await;
    assert_eq!(view["updatedAt"], settled["updatedAt"]);
}

#[tokio::test]
async fn stale_event_cannot_drag_a_settled_payment_back() {
    let harness = sandbox_app();
    let (id, gateway_id) = processing_payment(&harness).await;

    let captured = json!({
        "event": "payment.captured",
        "payment_id": gateway_id,
        "status": "completed",
    })
    .to_string();
    let signature = harness.verifier.sign(captured.as_bytes());
    deliver(&harness.app, &captured, Some(&signature)).await;

    // An authorization event arriving after capture is out of order.
    let stale = json!({
        "event": "payment.authorized",
        "payment_id": gateway_id,
        "status": "processing",
    })
    .to_string();
    let signature = harness.verifier.sign(stale.as_bytes());

    let (status, body) = deliver(&harness.app, &stale, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ignored"], "event does not apply to current state");

    let view = fetch(&harness, &id).await;
    assert_eq!(view["status"], "SUCCEEDED");
}

#[tokio::test]
async fn failed_event_records_the_gateway_reason() {
    let harness = sandbox_app();
    let (id, gateway_id) = processing_payment(&harness).await;

    let payload = json!({
        "event": "payment.failed",
        "payment_id": gateway_id,
        "status": "declined",
        "failure_reason": "Card reported stolen",
    })
    .to_string();
    let signature = harness.verifier.sign(payload.as_bytes());

    let (status, body) = deliver(&harness.app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "FAILED");

    let view = fetch(&harness, &id).await;
    assert_eq!(view["status"], "FAILED");
    assert_eq!(view["failureReason"], "Card reported stolen");
}

#[tokio::test]
async fn nested_data_payloads_are_understood() {
    let harness = sandbox_app();
    let (id, gateway_id) = processing_payment(&harness).await;

    let payload = json!({
        "event": "payment.captured",
        "data": { "payment_id": gateway_id, "status": "completed" },
    })
    .to_string();
    let signature = harness.verifier.sign(payload.as_bytes());

    let (status, _) = deliver(&harness.app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetch(&harness, &id).await["status"], "SUCCEEDED");
}

#[tokio::test]
async fn events_for_unknown_payments_are_acknowledged() {
    let harness = sandbox_app();
    let payload = json!({
        "event": "payment.captured",
        "payment_id": "sb_never_seen",
        "status": "completed",
    })
    .to_string();
    let signature = harness.verifier.sign(payload.as_bytes());

    let (status, body) = deliver(&harness.app, &payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert!(body["ignored"].is_string());
}

#[tokio::test]
async fn unparseable_but_signed_payload_is_bad_request() {
    let harness = sandbox_app();
    let payload = "not json at all";
    let signature = harness.verifier.sign(payload.as_bytes());

    let (status, body) = deliver(&harness.app, payload, Some(&signature)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("malformed webhook payload"));
}
