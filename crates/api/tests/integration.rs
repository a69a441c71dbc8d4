//! Integration tests for API routes.
//!
//! Uses `tower::ServiceExt` to test Axum routes without a real HTTP server.
//! Every collaborator is in-memory, so no Redis or database is needed.

use std::io;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use tower::ServiceExt;

use courier_api::routes::create_router;
use courier_api::state::AppState;
use courier_common::memory::{InMemoryMetricsSink, InMemoryQueue, RecordingAlertChannel};
use courier_common::providers::ManualClock;
use courier_monitor::system::{SystemProbe, SystemSample};
use courier_monitor::{DlqMonitor, DlqMonitorConfig, PerformanceMonitor};
use courier_reprocessor::{DlqReprocessor, ReprocessorConfig};

// ============================================================
// Helpers
// ============================================================

struct FixedProbe(Option<SystemSample>);

impl SystemProbe for FixedProbe {
    fn sample(&self) -> io::Result<SystemSample> {
        self.0
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no procfs"))
    }
}

struct TestApp {
    dlq: Arc<InMemoryQueue>,
    primary: Arc<InMemoryQueue>,
    metrics: Arc<InMemoryMetricsSink>,
    state: AppState,
}

fn build_app(probe: FixedProbe) -> TestApp {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());
    let dlq = Arc::new(InMemoryQueue::with_clock("notifications-dlq", Arc::new(clock.clone())));
    let primary = Arc::new(InMemoryQueue::with_clock("notifications", Arc::new(clock.clone())));
    let metrics = Arc::new(InMemoryMetricsSink::new());

    let dlq_monitor = DlqMonitor::new(
        DlqMonitorConfig::new("notifications-dlq").with_namespace("test"),
        dlq.clone(),
        metrics.clone(),
        Arc::new(RecordingAlertChannel::new()),
        Arc::new(clock.clone()),
    );
    let reprocessor = DlqReprocessor::new(
        dlq.clone(),
        primary.clone(),
        metrics.clone(),
        Arc::new(clock),
        ReprocessorConfig {
            batch_delay: std::time::Duration::ZERO,
            namespace: "test".to_string(),
            ..ReprocessorConfig::default()
        },
    );
    let performance = PerformanceMonitor::new(metrics.clone(), "test", Arc::new(probe));

    TestApp {
        dlq,
        primary,
        metrics,
        state: AppState::new(dlq_monitor, reprocessor, performance),
    }
}

fn default_app() -> TestApp {
    build_app(FixedProbe(Some(SystemSample {
        resident_bytes: 50,
        memory_limit_bytes: 100,
        cpu_time_ms: 420,
    })))
}

fn router(app: &TestApp) -> Router {
    create_router(app.state.clone())
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn event(n: usize) -> String {
    serde_json::json!({ "type": "comment.created", "commentId": n }).to_string()
}

// ============================================================
// Liveness
// ============================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = default_app();
    let (status, json) = send(router(&app), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "courier-api");
    assert_eq!(json["dlq"], "notifications-dlq");
}

// ============================================================
// DLQ
// ============================================================

#[tokio::test]
async fn test_dlq_health_reflects_queue_depth() {
    let app = default_app();

    let (status, json) = send(router(&app), get("/api/dlq/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["alerts"].as_array().unwrap().len(), 0);

    for i in 0..15 {
        app.dlq.seed(&format!("m{}", i), &event(i), 1).await;
    }

    let (status, json) = send(router(&app), get("/api/dlq/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(json["status"], "healthy");
    assert_eq!(json["snapshot"]["message_count"], 15);
    assert_eq!(json["alerts"][0]["kind"], "accumulation");
}

#[tokio::test]
async fn test_dlq_health_provider_failure_is_bad_gateway() {
    let app = default_app();
    app.dlq.fail_attributes(true).await;

    let (status, json) = send(router(&app), get("/api/dlq/health")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(json["error"].as_str().unwrap().contains("attributes failed"));
}

#[tokio::test]
async fn test_dashboard_with_empty_queue() {
    let app = default_app();

    let (status, json) = send(router(&app), get("/api/dlq/dashboard")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["health"]["status"], "healthy");
    assert_eq!(json["recommendations"], serde_json::json!(["No action needed"]));
    assert!(json["message_count_series"].is_array());
}

#[tokio::test]
async fn test_collect_metrics_publishes_snapshot() {
    let app = default_app();
    app.dlq.seed("m1", &event(1), 1).await;
    app.dlq.seed("m2", &event(2), 1).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/dlq/metrics")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(router(&app), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message_count"], 2);
    let published = app.metrics.published_named("MessageCount").await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].value, 2.0);
}

#[tokio::test]
async fn test_reprocess_dry_run_via_api() {
    let app = default_app();
    app.dlq.seed("m1", &event(1), 1).await;
    app.dlq.seed("m2", &event(2), 1).await;

    let (status, json) = send(
        router(&app),
        with_json("POST", "/api/dlq/reprocess", serde_json::json!({ "dry_run": true })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["dry_run"], true);
    assert_eq!(json["total"], 2);
    assert_eq!(json["success_count"], 2);
    assert_eq!(app.dlq.len().await, 2);
    assert!(app.primary.is_empty().await);
}

#[tokio::test]
async fn test_reprocess_by_ids_via_api() {
    let app = default_app();
    app.dlq.seed("m1", &event(1), 1).await;
    app.dlq.seed("m2", &event(2), 1).await;

    let (status, json) = send(
        router(&app),
        with_json(
            "POST",
            "/api/dlq/reprocess",
            serde_json::json!({ "message_ids": ["m2"] }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success_count"], 1);
    assert_eq!(json["outcomes"][0]["message_id"], "m2");
    assert!(app.dlq.contains("m1").await);
    assert!(!app.dlq.contains("m2").await);
    assert_eq!(app.primary.len().await, 1);
}

#[tokio::test]
async fn test_reprocess_rejects_zero_batch_size() {
    let app = default_app();

    let (status, json) = send(
        router(&app),
        with_json("POST", "/api/dlq/reprocess", serde_json::json!({ "batch_size": 0 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("batch_size"));
}

#[tokio::test]
async fn test_reprocess_drain_failure_is_bad_gateway() {
    let app = default_app();
    app.dlq.fail_receives(true).await;

    let (status, _) = send(
        router(&app),
        with_json("POST", "/api/dlq/reprocess", serde_json::json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

// ============================================================
// Performance
// ============================================================

#[tokio::test]
async fn test_threshold_update_roundtrip() {
    let app = default_app();

    let (status, mut thresholds) = send(router(&app), get("/api/performance/thresholds")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(thresholds["delivery"]["warning_ms"], 3000);
    assert_eq!(thresholds["delivery"]["critical_ms"], 10000);

    thresholds["delivery"] = serde_json::json!({ "warning_ms": 1000, "critical_ms": 4000 });
    let (status, updated) = send(
        router(&app),
        with_json("PUT", "/api/performance/thresholds", thresholds.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated, thresholds);

    let (_, current) = send(router(&app), get("/api/performance/thresholds")).await;
    assert_eq!(current["delivery"]["warning_ms"], 1000);
    assert_eq!(current["event_processing"]["warning_ms"], 5000);
}

#[tokio::test]
async fn test_threshold_update_rejects_inverted_pair() {
    let app = default_app();

    let (_, mut thresholds) = send(router(&app), get("/api/performance/thresholds")).await;
    thresholds["fan_out_publish"] = serde_json::json!({ "warning_ms": 9000, "critical_ms": 100 });

    let (status, _) = send(
        router(&app),
        with_json("PUT", "/api/performance/thresholds", thresholds),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, current) = send(router(&app), get("/api/performance/thresholds")).await;
    assert_eq!(current["fan_out_publish"]["warning_ms"], 2000);
}

#[tokio::test]
async fn test_system_health_endpoint() {
    let app = default_app();

    let (status, json) = send(router(&app), get("/api/performance/system")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["memory_utilization_percent"], 50.0);
    assert_eq!(json["cpu_time_ms"], 420);
    assert_eq!(app.metrics.published_named("MemoryUtilization").await.len(), 1);
}

#[tokio::test]
async fn test_system_health_probe_failure_is_server_error() {
    let app = build_app(FixedProbe(None));

    let (status, _) = send(router(&app), get("/api/performance/system")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
