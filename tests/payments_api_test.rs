//! HTTP tests for the payment routes, running on the in-memory ledger

use axum::{body::Body, Router};
use http::{Request, StatusCode};
use plantcare_backend::api::{self, payments::PaymentState};
use plantcare_backend::config::GatewayConfig;
use plantcare_backend::database::ledger::{InMemoryLedger, PaymentLedger};
use plantcare_backend::health::HealthChecker;
use plantcare_backend::payments::encoding::GatewayParams;
use plantcare_backend::payments::{
    CallbackValidator, HashSecret, PaymentRequestBuilder, PaymentStatus, Signer,
};
use plantcare_backend::services::{
    LoggingEntitlementService, PaymentOrderService, ReconciliationCoordinator,
};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

const SECRET: &str = "api-test-secret";

fn build_app() -> (Router, Arc<InMemoryLedger>) {
    let config = GatewayConfig {
        merchant_code: "DEMO0001".to_string(),
        hash_secret: HashSecret::new(SECRET),
        ..Default::default()
    };
    let ledger = Arc::new(InMemoryLedger::new());
    let timezone = config.timezone().expect("timezone");

    let builder =
        PaymentRequestBuilder::new(config.clone(), ledger.clone()).expect("request builder");
    let coordinator = ReconciliationCoordinator::new(
        CallbackValidator::new(Signer::new(config.hash_secret.clone()), timezone),
        ledger.clone(),
        Arc::new(LoggingEntitlementService::new()),
    );
    let state = Arc::new(PaymentState {
        builder: Arc::new(builder),
        coordinator: Arc::new(coordinator),
        orders: PaymentOrderService::new(ledger.clone()),
    });

    (api::build_router(state, HealthChecker::new(None)), ledger)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn create_order(app: &Router, amount_minor: i64) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments")
                .header("content-type", "application/json")
                .header("x-forwarded-for", "203.0.113.7")
                .header("x-owner-ref", "user-7")
                .body(Body::from(
                    serde_json::json!({
                        "amount_minor": amount_minor,
                        "order_info": "Premium upgrade"
                    })
                    .to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    json["order_id"].as_str().expect("order id").to_string()
}

fn signed_query(order_id: &str, response_code: &str, gateway_amount: &str) -> String {
    let params = GatewayParams::from_pairs(vec![
        ("vnp_Amount", gateway_amount),
        ("vnp_ResponseCode", response_code),
        ("vnp_TmnCode", "DEMO0001"),
        ("vnp_TransactionNo", "14999999"),
        ("vnp_TxnRef", order_id),
    ])
    .expect("unique keys");
    let signature = Signer::new(HashSecret::new(SECRET)).sign(&params);
    format!("{}&vnp_SecureHash={}", params.canonical(), signature)
}

#[tokio::test]
async fn create_payment_returns_signed_url_and_persists_order() {
    let (app, ledger) = build_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments")
                .header("content-type", "application/json")
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.2")
                .body(Body::from(
                    r#"{"amount_minor": 299000, "order_info": "Premium upgrade", "order_id": "PLANT-1"}"#,
                ))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().contains_key("x-request-id"));

    let json = body_json(response).await;
    assert_eq!(json["order_id"], "PLANT-1");
    let url = json["payment_url"].as_str().expect("url");
    assert!(url.contains("vnp_Amount=29900000"));
    assert!(url.contains("vnp_IpAddr=203.0.113.7&"));
    assert!(url.contains("vnp_SecureHash="));

    let order = ledger
        .find_by_order_id("PLANT-1")
        .await
        .expect("lookup")
        .expect("order");
    assert_eq!(order.status, PaymentStatus::Pending);
}

#[tokio::test]
async fn create_payment_rejects_out_of_range_amount() {
    let (app, _) = build_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments")
                .header("content-type", "application/json")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::from(r#"{"amount_minor": 10, "order_info": "x"}"#))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "INVALID_AMOUNT");
}

#[tokio::test]
async fn create_payment_without_client_origin_is_rejected() {
    let (app, _) = build_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"amount_minor": 10000, "order_info": "x"}"#))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn malformed_json_gets_error_envelope() {
    let (app, _) = build_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn ipn_then_return_settles_once() {
    let (app, _) = build_app();
    let order_id = create_order(&app, 50_000).await;
    let query = signed_query(&order_id, "00", "5000000");

    let ipn = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/payments/ipn?{}", query))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(ipn.status(), StatusCode::OK);
    assert_eq!(
        body_json(ipn).await,
        serde_json::json!({"RspCode": "00", "Message": "Confirm Success"})
    );

    let browser = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/payments/return?{}", query))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(browser.status(), StatusCode::OK);
    let json = body_json(browser).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "completed");

    let order = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/payments/orders/{}", order_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(order.status(), StatusCode::OK);
    let json = body_json(order).await;
    assert_eq!(json["status"], "completed");
    assert_eq!(json["external_txn_ref"], "14999999");
}

#[tokio::test]
async fn ipn_posted_as_form_is_accepted() {
    let (app, _) = build_app();
    let order_id = create_order(&app, 50_000).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/ipn")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(signed_query(&order_id, "24", "5000000")))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["RspCode"], "00");
}

#[tokio::test]
async fn ipn_rejections_still_answer_200() {
    let (app, _) = build_app();
    let order_id = create_order(&app, 50_000).await;

    let cases = [
        (signed_query(&order_id, "00", "100"), "04"),
        (signed_query("MISSING", "00", "5000000"), "01"),
        (format!("vnp_TxnRef={}&vnp_SecureHash=00ff", order_id), "97"),
    ];

    for (query, expected) in cases {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/payments/ipn?{}", query))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["RspCode"], expected);
    }
}

#[tokio::test]
async fn browser_return_with_bad_signature_is_400() {
    let (app, _) = build_app();
    let order_id = create_order(&app, 50_000).await;
    let query = signed_query(&order_id, "00", "5000000").replace("vnp_ResponseCode=00", "vnp_ResponseCode=01");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/payments/return?{}", query))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn orders_are_listed_by_owner() {
    let (app, _) = build_app();
    create_order(&app, 50_000).await;
    create_order(&app, 60_000).await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/payments/orders")
                .header("x-owner-ref", "user-7")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(2));

    // The query string cannot select someone else's orders.
    let other = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/payments/orders?owner_ref=user-7")
                .header("x-owner-ref", "user-8")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(body_json(other).await.as_array().map(Vec::len), Some(0));

    let missing = app
        .oneshot(
            Request::builder()
                .uri("/api/payments/orders")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_order_lookup_is_404() {
    let (app, _) = build_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/payments/orders/NOPE")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn health_reports_in_memory_ledger_as_degraded() {
    let (app, _) = build_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "Degraded");
}
