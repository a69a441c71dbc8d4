//! Redis-backed metrics sink.
//!
//! Every series (namespace + metric + dimension set) is a sorted set of
//! samples scored by timestamp in milliseconds. A per-metric index set lists
//! the dimension sets seen, so queries can match on a subset of dimensions.
//! Samples older than the retention window are trimmed on publish.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use courier_common::error::ProviderError;
use courier_common::providers::{MetricsSink, aggregate_points};
use courier_common::types::{MetricDatum, MetricPoint, MetricQuery};

use crate::KEY_PREFIX;

/// Default sample retention (48 hours).
const DEFAULT_RETENTION: Duration = Duration::from_secs(48 * 3600);

/// Redis [`MetricsSink`].
pub struct RedisMetricsSink {
    conn: ConnectionManager,
    retention: Duration,
}

impl RedisMetricsSink {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

#[async_trait]
impl MetricsSink for RedisMetricsSink {
    async fn publish(&self, namespace: &str, data: Vec<MetricDatum>) -> Result<(), ProviderError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.clone();
        let cutoff_ms = Utc::now().timestamp_millis() - self.retention.as_millis() as i64;
        let mut pipe = redis::pipe();

        for datum in &data {
            let dimensions = serde_json::to_string(&datum.dimensions)?;
            let series = series_key(namespace, &datum.name, &dimensions);
            pipe.sadd(index_key(namespace, &datum.name), &dimensions)
                .ignore()
                .zadd(&series, sample_member(datum.value), datum.timestamp.timestamp_millis())
                .ignore()
                .zrembyscore(&series, "-inf", format!("({}", cutoff_ms))
                .ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;

        tracing::trace!(namespace, count = data.len(), "Published metrics");
        Ok(())
    }

    async fn query(&self, query: &MetricQuery) -> Result<Vec<MetricPoint>, ProviderError> {
        let mut conn = self.conn.clone();
        let dimension_sets: Vec<String> = conn
            .smembers(index_key(&query.namespace, &query.metric))
            .await?;

        let start_ms = query.start.timestamp_millis();
        let end_ms = query.end.timestamp_millis();
        let mut samples = Vec::new();

        for raw in dimension_sets {
            let dimensions: BTreeMap<String, String> = serde_json::from_str(&raw)?;
            if !query
                .dimensions
                .iter()
                .all(|(k, v)| dimensions.get(k) == Some(v))
            {
                continue;
            }

            let series = series_key(&query.namespace, &query.metric, &raw);
            let members: Vec<(String, f64)> = conn
                .zrangebyscore_withscores(&series, start_ms, format!("({}", end_ms))
                .await?;

            samples.extend(members.into_iter().filter_map(|(member, score)| {
                let value = parse_sample_member(&member)?;
                let timestamp = chrono::DateTime::from_timestamp_millis(score as i64)?;
                Some((timestamp, value))
            }));
        }

        Ok(aggregate_points(query, samples))
    }
}

/// `courier:metrics:{namespace}:{metric}:{dimensions-json}`
fn series_key(namespace: &str, metric: &str, dimensions_json: &str) -> String {
    format!("{}:metrics:{}:{}:{}", KEY_PREFIX, namespace, metric, dimensions_json)
}

/// `courier:metrics-index:{namespace}:{metric}`
fn index_key(namespace: &str, metric: &str) -> String {
    format!("{}:metrics-index:{}:{}", KEY_PREFIX, namespace, metric)
}

/// Sorted-set members must be unique, so each sample carries its own id.
fn sample_member(value: f64) -> String {
    format!("{}|{}", Uuid::new_v4(), value)
}

fn parse_sample_member(member: &str) -> Option<f64> {
    member.split_once('|')?.1.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_member_round_trip() {
        let member = sample_member(12.5);
        assert_eq!(parse_sample_member(&member), Some(12.5));
        assert_ne!(sample_member(1.0), sample_member(1.0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_sample_member("no-separator"), None);
        assert_eq!(parse_sample_member("id|not-a-number"), None);
    }

    #[test]
    fn test_series_keys_differ_by_dimensions() {
        let a = series_key("ns", "MessageCount", r#"{"QueueName":"a"}"#);
        let b = series_key("ns", "MessageCount", r#"{"QueueName":"b"}"#);
        assert_ne!(a, b);
        assert!(a.starts_with("courier:metrics:ns:MessageCount:"));
        assert_eq!(index_key("ns", "MessageCount"), "courier:metrics-index:ns:MessageCount");
    }
}
