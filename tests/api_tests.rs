mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower::ServiceExt;

use common::*;
use polycopy::api::router::create_router;
use polycopy::config::AppConfig;
use polycopy::db::{IntentStore, MemoryIntentStore};
use polycopy::models::Side;
use polycopy::queue::{JobQueue, MemoryQueue, QueueSettings};
use polycopy::AppState;

fn test_state(api_token: Option<&str>) -> AppState {
    let mut config = AppConfig::for_tests();
    config.api_token = api_token.map(String::from);

    AppState {
        db: None,
        config,
        queue: JobQueue::new(Arc::new(MemoryQueue::new()), QueueSettings::default()),
        intents: Arc::new(MemoryIntentStore::new()),
        // a detached recorder: installing the global one twice in one process panics
        metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
        pause_flag: Arc::new(AtomicBool::new(false)),
        listener_state: None,
    }
}

async fn call(app: axum::Router, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header("authorization", format!("Bearer {token}"));
    }
    let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_reports_memory_backends() {
    let app = create_router(test_state(None));

    let (status, json) = call(app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["db"], "memory");
    assert_eq!(json["queue"], "connected");
    assert_eq!(json["settlementListener"], "disabled");
}

#[tokio::test]
async fn test_queue_stats_and_dlq() {
    let state = test_state(None);
    state.queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
    state.queue.enqueue(intent(Side::Buy, "10", "0.5")).await.unwrap();
    let claimed = state.queue.claim(std::time::Duration::from_millis(50)).await.unwrap().unwrap();
    state.queue.fail_permanently(&claimed.token, "FATAL_EXECUTION_ERROR", None).await.unwrap();
    let app = create_router(state);

    let (status, json) = call(app.clone(), "GET", "/api/queue/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pending"], 1);
    assert_eq!(json["inFlight"], 0);
    assert_eq!(json["dlq"], 1);
    assert_eq!(json["maxSize"], 5000);

    let (status, json) = call(app.clone(), "GET", "/api/queue/dlq?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["index"], 0);
    assert!(rows[0]["entry"].is_object());

    let (status, json) = call(app, "GET", "/api/queue/dlq?limit=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_intent_detail() {
    let state = test_state(None);
    let copy = intent(Side::Sell, "12", "0.6");
    state.intents.insert(&copy).await.unwrap();
    let app = create_router(state);

    let (status, json) = call(app.clone(), "GET", &format!("/api/intents/{}", copy.idempotency_key), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "PENDING");
    assert_eq!(json["copy_side"], "SELL");

    let (status, _) = call(app, "GET", "/api/intents/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pause_resume_and_status() {
    let state = test_state(None);
    let flag = state.pause_flag.clone();
    let app = create_router(state);

    let (status, json) = call(app.clone(), "POST", "/api/control/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "paused");
    assert!(flag.load(Ordering::Relaxed));

    let (_, json) = call(app.clone(), "GET", "/api/control/status", None).await;
    assert_eq!(json["paused"], true);
    assert_eq!(json["mode"], "dry_run");
    assert_eq!(json["queue"]["pending"], 0);

    let (status, json) = call(app, "POST", "/api/control/resume", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "running");
    assert!(!flag.load(Ordering::Relaxed));
}

#[tokio::test]
async fn test_api_token_guards_protected_routes_only() {
    let app = create_router(test_state(Some("s3cret")));

    let (status, _) = call(app.clone(), "GET", "/api/queue/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(app.clone(), "POST", "/api/control/pause", Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(app.clone(), "GET", "/api/queue/stats", Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_renders_text() {
    let app = create_router(test_state(None));

    let resp = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/plain; version=0.0.4");
}
