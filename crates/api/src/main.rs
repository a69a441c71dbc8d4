//! Courier API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_common::providers::SystemClock;
use courier_common::{db, redis_pool};
use courier_monitor::system::ProcfsProbe;
use courier_monitor::{DlqMonitor, DlqMonitorConfig, PerformanceMonitor};
use courier_queue::{RedisMetricsSink, RedisQueue};
use courier_reprocessor::{DlqReprocessor, FileReportStore, PgReportStore, ReprocessorConfig};

use courier_api::routes::create_router;
use courier_api::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("courier_api=debug,courier_monitor=info,courier_reprocessor=info,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Courier API server...");

    let config = AppConfig::from_env()?;

    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    tracing::info!("Redis connection established");

    let visibility = Duration::from_secs(config.queue_visibility_timeout_secs);
    let dlq = Arc::new(RedisQueue::new(redis.clone(), config.dlq_name.clone(), visibility));
    let primary = Arc::new(RedisQueue::new(
        redis.clone(),
        config.primary_queue_name.clone(),
        visibility,
    ));
    let metrics = Arc::new(RedisMetricsSink::new(redis));
    let alerts = courier_notifier::alert_channel_from_config(&config)?;

    // The scheduled ticks belong to courier-dlq-monitor; this instance only
    // answers on-demand calls
    let dlq_monitor = DlqMonitor::new(
        DlqMonitorConfig::from_app_config(&config),
        dlq.clone(),
        metrics.clone(),
        alerts,
        Arc::new(SystemClock),
    );

    let mut reprocessor = DlqReprocessor::new(
        dlq,
        primary,
        metrics.clone(),
        Arc::new(SystemClock),
        ReprocessorConfig::from_app_config(&config),
    )
    .with_store(Arc::new(FileReportStore::new(&config.report_dir)));

    if let Some(url) = &config.database_url {
        let pool = db::connect_audit_db(url, config.db_max_connections).await?;
        reprocessor = reprocessor.with_store(Arc::new(PgReportStore::new(pool)));
        tracing::info!("Database pool created");
    }

    let performance = PerformanceMonitor::new(
        metrics,
        config.metrics_namespace.clone(),
        Arc::new(ProcfsProbe::new(config.memory_limit_mb)),
    );

    let state = AppState::new(dlq_monitor, reprocessor, performance);

    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
