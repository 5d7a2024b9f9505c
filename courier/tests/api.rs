//! End-to-end tests of the HTTP API against in-memory stores

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use courier::api;
use courier_common::MessageStatus;
use courier_delivery::{
    DispatchConfig, DispatchEngine, Provider, ProviderPool, RateLimitConfig, RetryPolicy,
    SimulatedProvider,
};
use courier_store::{MemoryMessageStore, MessageStore, StoreOperation, TestMessageStore};
use serde_json::{Value, json};
use tower::ServiceExt;

fn pool(success_rate: f64) -> ProviderPool {
    ProviderPool::new(vec![
        Arc::new(SimulatedProvider::new("ProviderA", success_rate, Duration::ZERO))
            as Arc<dyn Provider>,
        Arc::new(SimulatedProvider::new("ProviderB", success_rate, Duration::ZERO)),
    ])
    .unwrap()
}

fn config(capacity: u32) -> DispatchConfig {
    DispatchConfig {
        rate_limit: RateLimitConfig {
            capacity,
            refill_interval_ms: 60_000,
        },
        retry: RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        },
        ..DispatchConfig::default()
    }
}

fn app(store: Arc<dyn MessageStore>, success_rate: f64, capacity: u32) -> Router {
    let engine = DispatchEngine::new(store, pool(success_rate), config(capacity)).unwrap();
    api::router(Arc::new(engine), Duration::from_secs(30))
}

fn send(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn status(id: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/api/status/{id}"))
        .body(Body::empty())
        .unwrap()
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let code = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (code, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn message(id: &str) -> Value {
    json!({
        "id": id,
        "to": "user@example.com",
        "subject": "Hello",
        "body": "World",
    })
}

#[tokio::test]
async fn test_root_is_alive() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 5);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Email Service is Running");
}

#[tokio::test]
async fn test_send_then_status() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 5);

    let (code, body) = call(&app, send(&message("m-1"))).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Email sending triggered or retried." }));

    let (code, body) = call(&app, status("m-1")).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, json!({ "id": "m-1", "status": "SENT" }));
}

#[tokio::test]
async fn test_duplicate_send_is_accepted_without_redelivery() {
    let store = Arc::new(MemoryMessageStore::new());
    let app = app(store.clone(), 1.0, 5);

    let (code, _) = call(&app, send(&message("m-dup"))).await;
    assert_eq!(code, StatusCode::OK);
    let (code, _) = call(&app, send(&message("m-dup"))).await;
    assert_eq!(code, StatusCode::OK);

    let record = store.find_by_id("m-dup").await.unwrap().unwrap();
    assert_eq!(record.status, MessageStatus::Sent);
    assert_eq!(record.retry_count, 0);
}

#[tokio::test]
async fn test_missing_fields_rejected() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 5);

    let (code, body) = call(&app, send(&json!({ "id": "m-2", "to": "user@example.com" }))).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Missing required fields" }));

    let mut empty_subject = message("m-2");
    empty_subject["subject"] = json!("");
    let (code, _) = call(&app, send(&empty_subject)).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    // Nothing was recorded for a rejected request
    let (_, body) = call(&app, status("m-2")).await;
    assert_eq!(body["status"], "NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_email_rejected() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 5);

    let mut bad = message("m-3");
    bad["to"] = json!("not-an-email");
    let (code, body) = call(&app, send(&bad)).await;

    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Invalid email address" }));
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 5);

    let request = Request::builder()
        .method("POST")
        .uri("/api/send")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();
    let (code, body) = call(&app, request).await;

    assert_eq!(code, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid request body"));
}

#[tokio::test]
async fn test_rate_limited_send() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 1);

    let (code, _) = call(&app, send(&message("m-4"))).await;
    assert_eq!(code, StatusCode::OK);

    let (code, body) = call(&app, send(&message("m-5"))).await;
    assert_eq!(code, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body,
        json!({ "error": "Rate limit exceeded. Please try again later." })
    );

    let (_, body) = call(&app, status("m-5")).await;
    assert_eq!(body["status"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_all_providers_failed() {
    let app = app(Arc::new(MemoryMessageStore::new()), 0.0, 5);

    let (code, body) = call(&app, send(&message("m-6"))).await;
    assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "All providers failed" }));

    let (_, body) = call(&app, status("m-6")).await;
    assert_eq!(body["status"], "FAILED");
}

#[tokio::test]
async fn test_status_of_unknown_message() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 5);

    let (code, body) = call(&app, status("nope")).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(body, json!({ "id": "nope", "status": "NOT_FOUND" }));
}

#[tokio::test]
async fn test_status_store_error() {
    let store = Arc::new(TestMessageStore::new());
    store.fail(StoreOperation::FindById);
    let app = app(store, 1.0, 5);

    let (code, body) = call(&app, status("m-7")).await;
    assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Failed to get status" }));
}

#[tokio::test]
async fn test_server_binds_and_shuts_down() {
    let app = app(Arc::new(MemoryMessageStore::new()), 1.0, 5);
    let server = api::ApiServer::bind("127.0.0.1:0", app).await.unwrap();
    assert!(server.local_addr().unwrap().port() > 0);

    let (sender, receiver) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(server.serve(receiver));

    sender.send(courier::controller::Signal::Shutdown).unwrap();
    handle.await.unwrap().unwrap();
}
