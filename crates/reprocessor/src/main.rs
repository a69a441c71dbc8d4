use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use courier_common::config::AppConfig;
use courier_common::providers::SystemClock;
use courier_common::{db, redis_pool};
use courier_queue::{RedisMetricsSink, RedisQueue};
use courier_reprocessor::{
    DlqReprocessor, FileReportStore, PgReportStore, ReprocessOptions, ReprocessorConfig,
    render_summary,
};

/// Redrive dead-lettered notification messages to the primary queue.
#[derive(Debug, Parser)]
#[command(name = "courier-reprocess", version)]
struct Cli {
    /// Report what would be reprocessed without touching either queue
    #[arg(long)]
    dry_run: bool,

    /// Process at most this many messages
    #[arg(long)]
    max: Option<usize>,

    /// Comma-separated message ids to reprocess
    #[arg(long, value_delimiter = ',')]
    ids: Option<Vec<String>>,

    /// Messages per batch (defaults to REPROCESS_BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Comma-separated error types (logged, not applied)
    #[arg(long, value_delimiter = ',')]
    error_types: Option<Vec<String>>,

    /// Directory for the JSON report and Markdown summary (defaults to REPORT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_reprocessor=info,courier_queue=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;
    let visibility = Duration::from_secs(config.queue_visibility_timeout_secs);
    let dlq = Arc::new(RedisQueue::new(redis.clone(), config.dlq_name.clone(), visibility));
    let primary = Arc::new(RedisQueue::new(
        redis.clone(),
        config.primary_queue_name.clone(),
        visibility,
    ));
    let metrics = Arc::new(RedisMetricsSink::new(redis));

    let output_dir = cli
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.report_dir));

    let mut reprocessor = DlqReprocessor::new(
        dlq,
        primary,
        metrics,
        Arc::new(SystemClock),
        ReprocessorConfig::from_app_config(&config),
    )
    .with_store(Arc::new(FileReportStore::new(output_dir)));

    if let Some(url) = &config.database_url {
        let pool = db::connect_audit_db(url, config.db_max_connections).await?;
        reprocessor = reprocessor.with_store(Arc::new(PgReportStore::new(pool)));
    }

    let options = ReprocessOptions {
        message_ids: cli.ids,
        error_types: cli.error_types,
        max_messages: cli.max,
        dry_run: cli.dry_run,
        validate_before_reprocess: true,
        batch_size: cli.batch_size.unwrap_or(config.reprocess_batch_size),
    };

    let report = reprocessor.reprocess(&options).await?;
    println!("{}", render_summary(&report));

    Ok(())
}
