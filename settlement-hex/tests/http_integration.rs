//! HTTP-level tests for the settlement API.
//!
//! These drive the full router (tracing, metrics and panic layers included)
//! through `tower::ServiceExt::oneshot` against the in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use settlement_hex::outbound::{PspRegistry, SimulatedPsp, StaticFundSource};
use settlement_hex::{SettlementConfig, SettlementService, inbound::HttpServer};
use settlement_repo::{InMemoryIdempotencyStore, InMemoryRepo};
use settlement_types::{
    AccountId, Currency, FundId, FundSource, Money, SettlementRepository, Transaction,
};
use tower::ServiceExt;

fn fund() -> FundId {
    FundId::new("growth-eu").unwrap()
}

/// Helper to build a router over the given repository.
fn app_with(repo: Arc<InMemoryRepo>) -> Router {
    let psps = PspRegistry::new("sim").register(Arc::new(
        SimulatedPsp::new("sim")
            .with_latency(Duration::ZERO)
            .with_decline_above(10_000),
    ));
    let sources: Vec<Arc<dyn FundSource>> = vec![
        Arc::new(StaticFundSource::new("custodian-a").with_balance(fund(), Money::new(1000, Currency::EUR))),
        Arc::new(StaticFundSource::new("custodian-b").with_balance(fund(), Money::new(500, Currency::EUR))),
        Arc::new(
            StaticFundSource::new("bank-ledger")
                .with_balance(fund(), Money::new(250, Currency::EUR))
                .with_latency(Duration::from_secs(5)),
        ),
    ];
    let config = SettlementConfig {
        source_timeout: Duration::from_millis(100),
        ..SettlementConfig::default()
    };
    let service = SettlementService::new(
        repo,
        Arc::new(InMemoryIdempotencyStore::default()),
        psps,
        sources,
        config,
    );
    HttpServer::new(service).router()
}

fn app() -> Router {
    app_with(Arc::new(InMemoryRepo::new()))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Helper to send a request and decode the JSON body.
async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

fn transaction_body(account: AccountId, amount: i64) -> Value {
    json!({ "account_id": account, "amount": amount, "currency": "USD" })
}

#[tokio::test]
async fn test_health_uses_envelope() {
    let (status, json) = send(&app(), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["data"]["psps"], json!(["sim"]));
}

#[tokio::test]
async fn test_same_key_same_payload_returns_same_transaction() {
    let app = app();
    let body = transaction_body(AccountId::new(), 1000);

    let (first_status, first) = send(&app, post("/transactions", body.clone(), Some("tx-1"))).await;
    let (second_status, second) = send(&app, post("/transactions", body, Some("tx-1"))).await;

    assert_eq!(first_status, StatusCode::CREATED);
    assert_eq!(second_status, StatusCode::CREATED);
    assert_eq!(first["data"]["id"], second["data"]["id"]);
    assert_eq!(first["data"]["state"], "PENDING");
}

#[tokio::test]
async fn test_same_key_different_payload_is_conflict() {
    let app = app();
    let account = AccountId::new();

    let (_, original) = send(
        &app,
        post("/transactions", transaction_body(account, 1000), Some("tx-1")),
    )
    .await;
    let (status, json) = send(
        &app,
        post("/transactions", transaction_body(account, 2000), Some("tx-1")),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], "error");
    assert_eq!(json["kind"], "IdempotencyKeyReused");
    assert_eq!(json["code"], 409);

    let id = original["data"]["id"].as_str().unwrap();
    let (_, stored) = send(&app, get(&format!("/transactions/{id}"))).await;
    assert_eq!(stored["data"]["amount"]["amount"], 1000);
}

#[tokio::test]
async fn test_header_and_body_key_must_agree() {
    let mut body = transaction_body(AccountId::new(), 1000);
    body["idempotency_key"] = json!("body-key");

    let (status, json) = send(&app(), post("/transactions", body, Some("header-key"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "ValidationError");
}

#[tokio::test]
async fn test_reverse_pending_is_invalid_state() {
    let app = app();
    let (_, created) = send(
        &app,
        post("/transactions", transaction_body(AccountId::new(), 300), None),
    )
    .await;
    let id = created["data"]["id"].as_str().unwrap();

    let (status, json) = send(
        &app,
        Request::builder()
            .method(Method::POST)
            .uri(format!("/transactions/{id}/reverse"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "InvalidState");
}

#[tokio::test]
async fn test_unknown_and_malformed_ids() {
    let app = app();

    let (status, json) = send(
        &app,
        get(&format!("/transactions/{}", uuid_like())),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "NotFound");

    let (status, json) = send(&app, get("/payments/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

fn uuid_like() -> String {
    AccountId::new().to_string()
}

#[tokio::test]
async fn test_malformed_body_gets_error_envelope() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/transactions")
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, json) = send(&app(), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "ValidationError");
}

#[tokio::test]
async fn test_payment_settled_and_declined() {
    let app = app();
    let account = AccountId::new();

    let (status, json) = send(
        &app,
        post(
            "/payments",
            json!({ "account_id": account, "amount": 500, "currency": "USD" }),
            Some("pay-1"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["data"]["outcome"], "SETTLED");

    let payment_id = json["data"]["payment_id"].as_str().unwrap();
    let (status, payment) = send(&app, get(&format!("/payments/{payment_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["data"]["state"], "SETTLED");

    let (status, json) = send(
        &app,
        post(
            "/payments",
            json!({ "account_id": account, "amount": 50_000, "currency": "USD" }),
            Some("pay-2"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "declined");
}

#[tokio::test]
async fn test_rejected_payment_is_error_envelope() {
    let (status, json) = send(
        &app(),
        post(
            "/payments",
            json!({ "account_id": AccountId::new(), "amount": 0, "currency": "USD" }),
            None,
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "InvalidAmount");
}

#[tokio::test]
async fn test_refund_settled_payment() {
    let app = app();
    let (_, paid) = send(
        &app,
        post(
            "/payments",
            json!({ "account_id": AccountId::new(), "amount": 700, "currency": "USD" }),
            None,
        ),
    )
    .await;
    let payment_id = paid["data"]["payment_id"].as_str().unwrap();

    let (status, json) = send(
        &app,
        post(&format!("/payments/{payment_id}/refund"), json!({}), Some("refund-1")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["outcome"], "REFUNDED");
    assert_eq!(json["data"]["payment"]["state"], "REFUNDED");
    assert!(json["data"]["reversal_transaction_id"].is_string());
}

#[tokio::test]
async fn test_batch_with_rejected_item_is_partial() {
    let account = AccountId::new();
    let body = json!({
        "payments": [
            { "account_id": account, "amount": 100, "currency": "USD" },
            { "account_id": account, "amount": 100, "currency": "XYZ" },
            { "account_id": account, "amount": 200, "currency": "USD" }
        ]
    });

    let (status, json) = send(&app(), post("/payments/batch", body, Some("batch-1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "partial");
    let outcomes: Vec<&str> = json["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["outcome"]["outcome"].as_str().unwrap())
        .collect();
    assert_eq!(outcomes, vec!["SETTLED", "REJECTED", "SETTLED"]);
}

#[tokio::test]
async fn test_aggregate_with_slow_source_is_partial() {
    let app = app();
    let body = json!({
        "fund_id": "growth-eu",
        "sources": ["custodian-a", "bank-ledger", "custodian-b"]
    });

    let (status, json) = send(&app, post("/funds/aggregate", body, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "partial");
    assert_eq!(json["data"]["partial"], true);
    assert_eq!(json["data"]["combined_balance"][0]["amount"], 1500);
    assert_eq!(json["data"]["sources"][1]["status"], "UNAVAILABLE");

    let (status, view) = send(&app, get("/funds/growth-eu")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["data"]["positions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_committed_transaction_without_payment_is_orphan() {
    let repo = Arc::new(InMemoryRepo::new());
    let tx = Transaction::pending(AccountId::new(), Money::new(900, Currency::USD), None, None)
        .unwrap()
        .commit()
        .unwrap();
    repo.insert_transaction(tx.clone()).await.unwrap();
    let app = app_with(repo);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/funds/reconcile")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["orphan_transactions"], json!([tx.id]));
    assert_eq!(json["data"]["matched"], json!([]));
    assert_eq!(json["data"]["clean"], false);

    let (_, history) = send(&app, get("/reconciliations")).await;
    assert_eq!(history["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let (status, json) = send(&app(), get("/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["info"]["title"], "Settlement Core API");
    assert!(json["paths"]["/payments/batch"].is_object());
}
