//! Performance threshold and system health routes.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use courier_common::error::AppError;
use courier_monitor::{MonitorError, PerformanceThresholds, SystemHealth};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/performance/thresholds",
            get(get_thresholds).put(update_thresholds),
        )
        .route("/api/performance/system", get(system_health))
}

/// GET /api/performance/thresholds
async fn get_thresholds(State(state): State<AppState>) -> Json<PerformanceThresholds> {
    Json(state.performance.read().await.thresholds())
}

/// PUT /api/performance/thresholds — Replace all thresholds.
///
/// Operations already being timed keep the thresholds they started with.
async fn update_thresholds(
    State(state): State<AppState>,
    Json(thresholds): Json<PerformanceThresholds>,
) -> Result<Json<PerformanceThresholds>, AppError> {
    thresholds.validate().map_err(AppError::Validation)?;

    let mut monitor = state.performance.write().await;
    *monitor = monitor.with_thresholds(thresholds);
    tracing::info!(thresholds = ?thresholds, "Performance thresholds updated");

    Ok(Json(monitor.thresholds()))
}

/// GET /api/performance/system — Sample and publish system health.
async fn system_health(State(state): State<AppState>) -> Result<Json<SystemHealth>, AppError> {
    let monitor = state.performance.read().await.clone();
    let health = monitor.monitor_system_health().await.map_err(|e| match e {
        MonitorError::Provider(e) => AppError::Provider(e),
        MonitorError::Probe(e) => AppError::Internal(format!("System probe failed: {}", e)),
    })?;
    Ok(Json(health))
}
