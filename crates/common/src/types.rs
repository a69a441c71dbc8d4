use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================
// Event classification
// ============================================================

/// Category of an inbound invocation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    MessageBatch,
    HttpRequest,
    ChangeFeed,
    Unknown,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::MessageBatch => write!(f, "message_batch"),
            EventCategory::HttpRequest => write!(f, "http_request"),
            EventCategory::ChangeFeed => write!(f, "change_feed"),
            EventCategory::Unknown => write!(f, "unknown"),
        }
    }
}

/// Metadata about the invocation that delivered a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationMeta {
    pub request_id: String,
    pub function_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InvocationMeta {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            function_name: None,
            received_at: Utc::now(),
        }
    }
}

/// Result of classifying one invocation payload.
///
/// `metadata` holds counts and key names for diagnostics only, never
/// business payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventClassification {
    pub category: EventCategory,
    pub valid: bool,
    pub errors: Vec<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl EventClassification {
    /// A classification with no errors.
    pub fn valid(
        category: EventCategory,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            category,
            valid: true,
            errors: Vec::new(),
            metadata,
        }
    }

    /// A classification carrying validation errors.
    pub fn invalid(
        category: EventCategory,
        errors: Vec<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            category,
            valid: false,
            errors,
            metadata,
        }
    }
}

// ============================================================
// Performance monitoring
// ============================================================

/// Kinds of operations the performance monitor knows thresholds for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    EventProcessing,
    Delivery,
    BatchProcessing,
    FanOutPublish,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] = [
        OperationKind::EventProcessing,
        OperationKind::Delivery,
        OperationKind::BatchProcessing,
        OperationKind::FanOutPublish,
    ];
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::EventProcessing => write!(f, "event_processing"),
            OperationKind::Delivery => write!(f, "delivery"),
            OperationKind::BatchProcessing => write!(f, "batch_processing"),
            OperationKind::FanOutPublish => write!(f, "fan_out_publish"),
        }
    }
}

/// Latency band of a completed operation, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceSeverity {
    Normal,
    Slow,
    Warning,
    Critical,
}

impl std::fmt::Display for PerformanceSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerformanceSeverity::Normal => write!(f, "normal"),
            PerformanceSeverity::Slow => write!(f, "slow"),
            PerformanceSeverity::Warning => write!(f, "warning"),
            PerformanceSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// One timed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub kind: OperationKind,
    pub operation: String,
    pub elapsed_ms: u64,
    pub severity: PerformanceSeverity,
}

// ============================================================
// DLQ monitoring
// ============================================================

/// Point-in-time read of a queue's depth, age and arrival rate.
///
/// Every field is non-negative; use [`QueueSnapshot::new`] to clamp raw
/// provider values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub queue_id: String,
    pub message_count: u64,
    pub oldest_message_age_seconds: u64,
    pub arrival_rate_per_window: f64,
    pub taken_at: DateTime<Utc>,
}

impl QueueSnapshot {
    pub fn new(
        queue_id: impl Into<String>,
        message_count: i64,
        oldest_message_age_seconds: i64,
        arrival_rate_per_window: f64,
        taken_at: DateTime<Utc>,
    ) -> Self {
        let rate = if arrival_rate_per_window.is_finite() {
            arrival_rate_per_window.max(0.0)
        } else {
            0.0
        };
        Self {
            queue_id: queue_id.into(),
            message_count: message_count.max(0) as u64,
            oldest_message_age_seconds: oldest_message_age_seconds.max(0) as u64,
            arrival_rate_per_window: rate,
            taken_at,
        }
    }
}

/// Which snapshot dimension an alert rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Accumulation,
    Staleness,
    HighRate,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::Accumulation => write!(f, "accumulation"),
            AlertKind::Staleness => write!(f, "staleness"),
            AlertKind::HighRate => write!(f, "high_rate"),
        }
    }
}

/// Static alerting rule: breach when the observed value exceeds `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub kind: AlertKind,
    pub threshold: f64,
}

impl AlertRule {
    pub fn new(kind: AlertKind, threshold: f64) -> Self {
        Self { kind, threshold }
    }
}

/// Alert severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A rule breach ready for delivery to the alert channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub snapshot: QueueSnapshot,
    pub threshold: f64,
    pub observed_value: f64,
}

/// Overall health of a monitored queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

// ============================================================
// Queue messages and reprocessing
// ============================================================

/// A message received from a queue, owned by the queue provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetteredMessage {
    pub id: String,
    /// Opaque handle used to delete or release this delivery.
    pub receipt_handle: String,
    pub body: String,
    /// Number of times the provider has delivered this message.
    pub receive_count: u32,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Per-message reprocessing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Failed => write!(f, "failed"),
            OutcomeStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// What happened to one dead-lettered message during a reprocessing pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessingOutcome {
    pub message_id: String,
    pub status: OutcomeStatus,
    pub reason: String,
    pub detail: Option<String>,
}

impl ReprocessingOutcome {
    pub fn success(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: OutcomeStatus::Success,
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn skipped(
        message_id: impl Into<String>,
        reason: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            status: OutcomeStatus::Skipped,
            reason: reason.into(),
            detail,
        }
    }

    pub fn failed(
        message_id: impl Into<String>,
        reason: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            status: OutcomeStatus::Failed,
            reason: reason.into(),
            detail,
        }
    }
}

/// Aggregated result of one reprocessing pass, persisted for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReprocessingReport {
    pub id: Uuid,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub duration_ms: u64,
    pub success_rate_percent: f64,
    pub outcomes: Vec<ReprocessingOutcome>,
    /// `"{id}: {error}"` for every failed outcome.
    pub errors: Vec<String>,
}

impl ReprocessingReport {
    /// Aggregate outcomes into a report.
    pub fn from_outcomes(
        outcomes: Vec<ReprocessingOutcome>,
        dry_run: bool,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        let total = outcomes.len();
        let count = |status: OutcomeStatus| outcomes.iter().filter(|o| o.status == status).count();
        let success_count = count(OutcomeStatus::Success);
        let failed_count = count(OutcomeStatus::Failed);
        let skipped_count = count(OutcomeStatus::Skipped);

        let success_rate_percent = if total == 0 {
            0.0
        } else {
            success_count as f64 / total as f64 * 100.0
        };

        let errors = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .map(|o| {
                let error = o.detail.as_deref().unwrap_or(&o.reason);
                format!("{}: {}", o.message_id, error)
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            dry_run,
            started_at,
            finished_at,
            total,
            success_count,
            failed_count,
            skipped_count,
            duration_ms,
            success_rate_percent,
            outcomes,
            errors,
        }
    }

    /// Outcomes with the given status, in processing order.
    pub fn outcomes_with(&self, status: OutcomeStatus) -> impl Iterator<Item = &ReprocessingOutcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }
}

// ============================================================
// Metrics
// ============================================================

/// Unit attached to a published metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    Count,
    Milliseconds,
    Seconds,
    Percent,
    Bytes,
    CountPerSecond,
}

/// One metric data point to publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDatum {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub dimensions: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl MetricDatum {
    pub fn new(name: impl Into<String>, value: f64, unit: MetricUnit) -> Self {
        Self {
            name: name.into(),
            value,
            unit,
            dimensions: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Reduction applied to the samples of one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statistic {
    Average,
    Sum,
    Minimum,
    Maximum,
    SampleCount,
}

/// A time-series query against a metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub namespace: String,
    pub metric: String,
    pub dimensions: BTreeMap<String, String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period_seconds: u64,
    pub statistic: Statistic,
}

/// One aggregated period of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}
