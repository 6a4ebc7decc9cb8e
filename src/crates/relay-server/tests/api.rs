//! HTTP surface tests over an in-memory runtime

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use relay_dispatch::{Coordinator, MemoryQueue, RetryPolicy};
use relay_events::EventBus;
use relay_server::{router, AppState};
use relay_store::MemoryStore;
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (axum::Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let bus = Arc::new(EventBus::new());
    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        store.clone(),
        queue,
        bus.clone(),
        RetryPolicy::default(),
    ));
    let state = AppState::new(store.clone(), store.clone(), coordinator, bus);
    (router(state), store)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn submit_then_inspect_run() {
    let (app, _store) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/runs", serde_json::json!({"input": "hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let receipt = body_json(response).await;
    let run_id = receipt["run_id"].as_str().unwrap().to_string();
    assert!(!receipt["message_id"].as_str().unwrap().is_empty());

    let response = app
        .clone()
        .oneshot(get(&format!("/api/runs/{}", run_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run = body_json(response).await;
    assert_eq!(run["status"], "queued");
    assert_eq!(run["input"], "hello");

    let response = app.clone().oneshot(get("/api/runs")).await.unwrap();
    let runs = body_json(response).await;
    assert_eq!(runs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_input_is_rejected() {
    let (app, _store) = app();
    let response = app
        .oneshot(post_json("/api/runs", serde_json::json!({"input": "  "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_run_is_404() {
    let (app, _store) = app();
    let response = app.oneshot(get("/api/runs/ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_flips_status() {
    let (app, _store) = app();

    let response = app
        .clone()
        .oneshot(post_json("/api/runs", serde_json::json!({"input": "x"})))
        .await
        .unwrap();
    let run_id = body_json(response).await["run_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/runs/{}/cancel", run_id), serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let run = body_json(response).await;
    assert_eq!(run["status"], "canceled");
    assert_eq!(run["error"], "canceled");
}

#[tokio::test]
async fn queue_stats_and_metrics() {
    let (app, _store) = app();
    app.clone()
        .oneshot(post_json("/api/runs", serde_json::json!({"input": "x"})))
        .await
        .unwrap();

    let response = app.clone().oneshot(get("/api/runtime/queue")).await.unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["stream_length"], 1);
    assert_eq!(stats["dlq_length"], 0);

    let response = app.clone().oneshot(get("/api/metrics")).await.unwrap();
    let metrics = body_json(response).await;
    assert_eq!(metrics["queue"]["stream_length"], 1);
}

#[tokio::test]
async fn checkpoints_endpoint_reports_latest() {
    let (app, store) = app();
    relay_store::StateStore::save_checkpoint(
        store.as_ref(),
        &relay_core::Checkpoint::new("r1", 1, "n1", serde_json::json!({"step": 1})),
    )
    .await
    .unwrap();
    relay_store::StateStore::save_checkpoint(
        store.as_ref(),
        &relay_core::Checkpoint::new("r1", 2, "n2", serde_json::json!({"step": 2})),
    )
    .await
    .unwrap();

    let response = app
        .clone()
        .oneshot(get("/api/runs/r1/checkpoints/latest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let checkpoint = body_json(response).await;
    assert_eq!(checkpoint["seq"], 2);

    let response = app
        .clone()
        .oneshot(get("/api/runs/none/checkpoints/latest"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn playground_unavailable_without_provider() {
    let (app, _store) = app();
    let response = app
        .oneshot(post_json("/api/playground/run", serde_json::json!({"input": "hi"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
