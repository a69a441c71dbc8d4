use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Redis connection string (queue and metrics backend)
    pub redis_url: String,

    /// PostgreSQL connection string for the reprocessing audit trail.
    /// Reports are only written to files when unset.
    pub database_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 5)
    pub db_max_connections: u32,

    /// Queue that reprocessed messages are resubmitted to
    pub primary_queue_name: String,

    /// Dead-letter queue that is monitored and drained
    pub dlq_name: String,

    /// Seconds a received message stays invisible before redelivery (default: 30)
    pub queue_visibility_timeout_secs: u64,

    /// Namespace for published metrics
    pub metrics_namespace: String,

    /// DLQ monitor tick interval in seconds (default: 60)
    pub dlq_monitor_interval_secs: u64,

    /// Alert when the DLQ holds more than this many messages
    pub dlq_accumulation_threshold: f64,

    /// Alert when the oldest DLQ message is older than this many seconds
    pub dlq_staleness_threshold_secs: f64,

    /// Alert when more than this many messages arrive per 5-minute window
    pub dlq_rate_threshold: f64,

    /// Webhook for alert delivery. Alerts are only logged when unset.
    pub alert_webhook_url: Option<String>,

    /// Messages per reprocessing batch (default: 5)
    pub reprocess_batch_size: usize,

    /// Delay between reprocessing batches in milliseconds (default: 1000)
    pub reprocess_batch_delay_ms: u64,

    /// Receive count above which a message is never resubmitted (default: 5)
    pub reprocess_max_receive_count: u32,

    /// Directory for JSON reports and Markdown summaries
    pub report_dir: String,

    /// Memory limit used for heap utilization, in megabytes.
    /// Falls back to total system memory when unset.
    pub memory_limit_mb: Option<u64>,

    /// HTTP port for the API server (default: 3000)
    pub api_port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "5")?,
            primary_queue_name: std::env::var("PRIMARY_QUEUE_NAME")
                .unwrap_or_else(|_| "notifications".to_string()),
            dlq_name: std::env::var("DLQ_NAME")
                .unwrap_or_else(|_| "notifications-dlq".to_string()),
            queue_visibility_timeout_secs: parse_var("QUEUE_VISIBILITY_TIMEOUT_SECS", "30")?,
            metrics_namespace: std::env::var("METRICS_NAMESPACE")
                .unwrap_or_else(|_| "Courier/Notifications".to_string()),
            dlq_monitor_interval_secs: parse_var("DLQ_MONITOR_INTERVAL_SECS", "60")?,
            dlq_accumulation_threshold: parse_var("DLQ_ACCUMULATION_THRESHOLD", "10")?,
            dlq_staleness_threshold_secs: parse_var("DLQ_STALENESS_THRESHOLD_SECS", "3600")?,
            dlq_rate_threshold: parse_var("DLQ_RATE_THRESHOLD", "5")?,
            alert_webhook_url: std::env::var("ALERT_WEBHOOK_URL").ok(),
            reprocess_batch_size: parse_var("REPROCESS_BATCH_SIZE", "5")?,
            reprocess_batch_delay_ms: parse_var("REPROCESS_BATCH_DELAY_MS", "1000")?,
            reprocess_max_receive_count: parse_var("REPROCESS_MAX_RECEIVE_COUNT", "5")?,
            report_dir: std::env::var("REPORT_DIR").unwrap_or_else(|_| "reports".to_string()),
            memory_limit_mb: std::env::var("MEMORY_LIMIT_MB")
                .ok()
                .map(|v| {
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("MEMORY_LIMIT_MB must be a valid u64"))
                })
                .transpose()?,
            api_port: parse_var("API_PORT", "3000")?,
        })
    }
}

/// Read `name` from the environment (or `default`) and parse it.
fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        })
}
