//! DLQ monitoring and reprocessing routes.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use courier_common::error::AppError;
use courier_common::types::{QueueSnapshot, ReprocessingReport};
use courier_monitor::{DashboardData, HealthReport};
use courier_reprocessor::{ReprocessError, ReprocessOptions};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dlq/health", get(health_status))
        .route("/api/dlq/dashboard", get(dashboard))
        .route("/api/dlq/metrics", post(collect_metrics))
        .route("/api/dlq/reprocess", post(reprocess))
}

/// GET /api/dlq/health — Evaluate the DLQ without alerting.
async fn health_status(State(state): State<AppState>) -> Result<Json<HealthReport>, AppError> {
    let report = state.dlq_monitor.get_health_status().await?;
    Ok(Json(report))
}

/// GET /api/dlq/dashboard — Health, depth history and recommendations.
async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardData>, AppError> {
    let data = state.dlq_monitor.get_dashboard_data().await?;
    Ok(Json(data))
}

/// POST /api/dlq/metrics — Take and publish a snapshot now.
async fn collect_metrics(State(state): State<AppState>) -> Result<Json<QueueSnapshot>, AppError> {
    let snapshot = state.dlq_monitor.collect_and_publish_metrics().await?;
    Ok(Json(snapshot))
}

/// POST /api/dlq/reprocess — Run one reprocessing pass with the given options.
async fn reprocess(
    State(state): State<AppState>,
    Json(options): Json<ReprocessOptions>,
) -> Result<Json<ReprocessingReport>, AppError> {
    let report = state
        .reprocessor
        .reprocess(&options)
        .await
        .map_err(reprocess_error)?;
    Ok(Json(report))
}

fn reprocess_error(e: ReprocessError) -> AppError {
    match e {
        ReprocessError::InvalidOptions(msg) => AppError::Validation(msg),
        ReprocessError::Drain(e) => AppError::Provider(e),
        other => AppError::Internal(other.to_string()),
    }
}
