//! Collaborator interfaces consumed by the reliability subsystem.
//!
//! Every component takes these as `Arc<dyn Trait>` so the Redis-backed
//! implementations and the in-memory ones in [`crate::memory`] are
//! interchangeable.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;
use crate::types::{DeadLetteredMessage, MetricDatum, MetricPoint, MetricQuery, Statistic};

/// Queue attributes a provider can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueAttribute {
    /// Messages available for receive.
    ApproximateNumberOfMessages,
    /// Messages received but not yet deleted or released.
    ApproximateNumberOfMessagesNotVisible,
    /// Age in seconds of the oldest message still in the queue.
    ApproximateAgeOfOldestMessage,
}

impl std::fmt::Display for QueueAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueAttribute::ApproximateNumberOfMessages => write!(f, "ApproximateNumberOfMessages"),
            QueueAttribute::ApproximateNumberOfMessagesNotVisible => {
                write!(f, "ApproximateNumberOfMessagesNotVisible")
            }
            QueueAttribute::ApproximateAgeOfOldestMessage => {
                write!(f, "ApproximateAgeOfOldestMessage")
            }
        }
    }
}

/// Message attributes attached on send.
pub type MessageAttributes = BTreeMap<String, String>;

/// A single queue with at-least-once receive and a visible receive count.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Name of the queue this provider is bound to.
    fn queue_name(&self) -> &str;

    /// Receive up to `max` messages, waiting up to `wait` when the queue is empty.
    ///
    /// Received messages stay invisible to other receivers until deleted,
    /// released, or their visibility lease expires.
    async fn receive_batch(
        &self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<DeadLetteredMessage>, ProviderError>;

    /// Enqueue a message and return its new id.
    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, ProviderError>;

    /// Permanently remove a received message.
    async fn delete(&self, receipt_handle: &str) -> Result<(), ProviderError>;

    /// Make a received message visible again immediately. The delivery it
    /// was received with is not counted.
    async fn release(&self, receipt_handle: &str) -> Result<(), ProviderError>;

    /// Read the requested attributes. Missing attributes are omitted.
    async fn attributes(
        &self,
        names: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, i64>, ProviderError>;
}

/// Time-series metrics backend.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn publish(&self, namespace: &str, data: Vec<MetricDatum>) -> Result<(), ProviderError>;

    async fn query(&self, query: &MetricQuery) -> Result<Vec<MetricPoint>, ProviderError>;
}

/// Fire-and-forget operator notification.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn notify(&self, subject: &str, payload: &serde_json::Value) -> Result<(), ProviderError>;
}

/// Source of wall-clock time for snapshots and reports.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|guard| *guard).unwrap_or_else(|_| Utc::now())
    }
}

/// Bucket raw `(timestamp, value)` samples into `period_seconds` periods
/// starting at `query.start` and reduce each non-empty period.
///
/// Samples outside `[start, end)` are ignored. Points come back in time order.
pub fn aggregate_points(
    query: &MetricQuery,
    samples: impl IntoIterator<Item = (DateTime<Utc>, f64)>,
) -> Vec<MetricPoint> {
    let period_ms = (query.period_seconds.max(1) * 1000) as i64;
    let start_ms = query.start.timestamp_millis();
    let end_ms = query.end.timestamp_millis();

    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for (ts, value) in samples {
        let ts_ms = ts.timestamp_millis();
        if ts_ms < start_ms || ts_ms >= end_ms {
            continue;
        }
        let bucket = (ts_ms - start_ms) / period_ms;
        buckets.entry(bucket).or_default().push(value);
    }

    buckets
        .into_iter()
        .filter_map(|(bucket, values)| {
            let timestamp =
                DateTime::<Utc>::from_timestamp_millis(start_ms + bucket * period_ms)?;
            Some(MetricPoint {
                timestamp,
                value: reduce(&values, query.statistic),
            })
        })
        .collect()
}

fn reduce(values: &[f64], statistic: Statistic) -> f64 {
    match statistic {
        Statistic::Average => values.iter().sum::<f64>() / values.len() as f64,
        Statistic::Sum => values.iter().sum(),
        Statistic::Minimum => values.iter().copied().fold(f64::INFINITY, f64::min),
        Statistic::Maximum => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Statistic::SampleCount => values.len() as f64,
    }
}
