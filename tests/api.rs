//! HTTP API tests driven through the router with `tower::ServiceExt::oneshot`.

mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::harness;

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_transfer(body: Value, idempotency_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/transfers")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn transfer_body() -> Value {
    json!({
        "from_account_number": "A",
        "to_account_number": "B",
        "amount": "100.00",
        "currency": "USD"
    })
}

#[tokio::test]
async fn test_submit_then_replay_with_header_key() {
    let h = harness().await;
    h.ledger.open_account("A", "USD", dec!(500.00)).await;
    h.ledger.open_account("B", "USD", dec!(0.00)).await;
    let app = h.saga.router();

    let (status, first) = call(&app, post_transfer(transfer_body(), Some("invoice-1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let reference = first["transfer_reference"].as_str().unwrap().to_string();
    assert!(reference.starts_with("TRF-"));
    assert!(first.get("version").is_none());

    let (status, replay) = call(&app, post_transfer(transfer_body(), Some("invoice-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["transfer_reference"], first["transfer_reference"]);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_conflicting_idempotency_keys_are_rejected() {
    let h = harness().await;
    let app = h.saga.router();

    let mut body = transfer_body();
    body["idempotency_key"] = json!("body-key");

    let (status, error) = call(&app, post_transfer(body, Some("header-key"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "invalid_request");
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_invalid_shape_is_rejected_without_a_record() {
    let h = harness().await;
    let app = h.saga.router();

    let mut body = transfer_body();
    body["amount"] = json!("-1.00");

    let (status, error) = call(&app, post_transfer(body, None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"]["code"], "invalid_request");
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_get_transfer() {
    let h = harness().await;
    let app = h.saga.router();

    let (status, error) = call(&app, get("/api/v1/transfers/TRF-missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error["error"]["code"], "transfer_not_found");

    let transfer = h
        .submit(common::request("A", "B", dec!(5.00), None))
        .await;
    let uri = format!("/api/v1/transfers/{}", transfer.transfer_reference);
    let (status, body) = call(&app, get(&uri)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["currency"], "USD");
}

#[tokio::test]
async fn test_list_account_transfers() {
    let h = harness().await;
    let app = h.saga.router();

    h.submit(common::request("A", "B", dec!(1.00), None)).await;
    h.submit(common::request("C", "A", dec!(2.00), None)).await;
    h.submit(common::request("C", "D", dec!(3.00), None)).await;

    let (status, body) = call(&app, get("/api/v1/accounts/A/transfers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = call(&app, get("/api/v1/accounts/A/transfers?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = call(&app, get("/api/v1/accounts/A/transfers?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_breakers() {
    let h = harness().await;
    let app = h.saga.router();

    let (status, body) = call(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "connected");
    assert_eq!(body["dependencies"][0]["name"], "ledger-service");
    assert_eq!(body["dependencies"][0]["circuit"], "CLOSED");
}
