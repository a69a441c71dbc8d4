use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_common::providers::SystemClock;
use courier_common::redis_pool;
use courier_monitor::dlq::{DlqMonitor, DlqMonitorConfig};
use courier_queue::{RedisMetricsSink, RedisQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_monitor=info,courier_queue=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier DLQ monitor starting...");

    let config = AppConfig::from_env()?;

    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let queue = Arc::new(RedisQueue::new(
        redis.clone(),
        config.dlq_name.clone(),
        std::time::Duration::from_secs(config.queue_visibility_timeout_secs),
    ));
    let metrics = Arc::new(RedisMetricsSink::new(redis));
    let alerts = courier_notifier::alert_channel_from_config(&config)?;

    let mut monitor = DlqMonitor::new(
        DlqMonitorConfig::from_app_config(&config),
        queue,
        metrics,
        alerts,
        Arc::new(SystemClock),
    );
    monitor.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping gracefully...");

    monitor.stop().await;

    tracing::info!("Courier DLQ monitor stopped.");
    Ok(())
}
