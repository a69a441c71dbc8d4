//! In-memory collaborators.
//!
//! Behave like the Redis-backed providers (at-least-once receive, visible
//! receive counts, in-flight leases) without a server, and expose fault
//! injection switches so failure paths can be exercised in tests.
//! In-flight messages never expire here: they stay invisible until deleted
//! or released. A release does not count as a delivery.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::providers::{
    AlertChannel, Clock, MessageAttributes, MetricsSink, QueueAttribute, QueueProvider,
    SystemClock, aggregate_points,
};
use crate::types::{DeadLetteredMessage, MetricDatum, MetricPoint, MetricQuery};

/// A message as stored by [`InMemoryQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub id: String,
    pub body: String,
    pub attributes: MessageAttributes,
    /// Deliveries so far.
    pub receive_count: u32,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: HashMap<String, QueuedMessage>,
    visible: VecDeque<String>,
    /// message id -> current receipt
    in_flight: HashMap<String, String>,
    fail_sends_containing: Option<String>,
    fail_deletes: bool,
    fail_receives: bool,
    fail_attributes: bool,
}

/// In-memory [`QueueProvider`].
pub struct InMemoryQueue {
    name: String,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Add a message whose next receive will report `receive_count`.
    pub async fn seed(&self, id: &str, body: &str, receive_count: u32) {
        let sent_at = self.clock.now();
        self.seed_sent_at(id, body, receive_count, sent_at).await;
    }

    /// Like [`seed`](Self::seed) with an explicit send time, for age checks.
    pub async fn seed_sent_at(&self, id: &str, body: &str, receive_count: u32, sent_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.messages.insert(
            id.to_string(),
            QueuedMessage {
                id: id.to_string(),
                body: body.to_string(),
                attributes: MessageAttributes::new(),
                receive_count: receive_count.saturating_sub(1),
                sent_at,
            },
        );
        state.visible.push_back(id.to_string());
    }

    /// Fail every `send` whose body contains `marker`.
    pub async fn fail_sends_containing(&self, marker: Option<&str>) {
        self.state.lock().await.fail_sends_containing = marker.map(str::to_string);
    }

    pub async fn fail_deletes(&self, fail: bool) {
        self.state.lock().await.fail_deletes = fail;
    }

    pub async fn fail_receives(&self, fail: bool) {
        self.state.lock().await.fail_receives = fail;
    }

    pub async fn fail_attributes(&self, fail: bool) {
        self.state.lock().await.fail_attributes = fail;
    }

    /// All stored messages (visible and in flight), ordered by id.
    pub async fn messages(&self) -> Vec<QueuedMessage> {
        let state = self.state.lock().await;
        let mut messages: Vec<QueuedMessage> = state.messages.values().cloned().collect();
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        messages
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.messages.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }
}

fn parse_handle(handle: &str) -> Result<(&str, &str), ProviderError> {
    handle
        .rsplit_once(':')
        .ok_or_else(|| ProviderError::Queue(format!("Malformed receipt handle '{}'", handle)))
}

#[async_trait]
impl QueueProvider for InMemoryQueue {
    fn queue_name(&self) -> &str {
        &self.name
    }

    async fn receive_batch(
        &self,
        max: usize,
        _wait: Duration,
    ) -> Result<Vec<DeadLetteredMessage>, ProviderError> {
        let mut state = self.state.lock().await;
        if state.fail_receives {
            return Err(ProviderError::Queue("receive failed (injected)".to_string()));
        }

        let mut received = Vec::new();
        while received.len() < max {
            let Some(id) = state.visible.pop_front() else {
                break;
            };
            let receipt = Uuid::new_v4().to_string();
            let Some(message) = state.messages.get_mut(&id) else {
                continue;
            };
            message.receive_count += 1;
            let delivered = DeadLetteredMessage {
                id: message.id.clone(),
                receipt_handle: format!("{}:{}", message.id, receipt),
                body: message.body.clone(),
                receive_count: message.receive_count,
                attributes: message.attributes.clone(),
            };
            state.in_flight.insert(id, receipt);
            received.push(delivered);
        }

        Ok(received)
    }

    async fn send(&self, body: &str, attributes: &MessageAttributes) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;
        if let Some(marker) = &state.fail_sends_containing
            && body.contains(marker.as_str())
        {
            return Err(ProviderError::Queue("send failed (injected)".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        state.messages.insert(
            id.clone(),
            QueuedMessage {
                id: id.clone(),
                body: body.to_string(),
                attributes: attributes.clone(),
                receive_count: 0,
                sent_at: self.clock.now(),
            },
        );
        state.visible.push_back(id.clone());
        Ok(id)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), ProviderError> {
        let (id, receipt) = parse_handle(receipt_handle)?;
        let mut state = self.state.lock().await;
        if state.fail_deletes {
            return Err(ProviderError::Queue("delete failed (injected)".to_string()));
        }
        if state.in_flight.get(id).map(String::as_str) != Some(receipt) {
            return Err(ProviderError::Queue(format!("Stale receipt handle for message {}", id)));
        }
        state.in_flight.remove(id);
        state.messages.remove(id);
        Ok(())
    }

    async fn release(&self, receipt_handle: &str) -> Result<(), ProviderError> {
        let (id, receipt) = parse_handle(receipt_handle)?;
        let mut state = self.state.lock().await;
        if state.in_flight.get(id).map(String::as_str) != Some(receipt) {
            return Err(ProviderError::Queue(format!("Stale receipt handle for message {}", id)));
        }
        state.in_flight.remove(id);
        if let Some(message) = state.messages.get_mut(id) {
            message.receive_count = message.receive_count.saturating_sub(1);
        }
        state.visible.push_back(id.to_string());
        Ok(())
    }

    async fn attributes(
        &self,
        names: &[QueueAttribute],
    ) -> Result<HashMap<QueueAttribute, i64>, ProviderError> {
        let state = self.state.lock().await;
        if state.fail_attributes {
            return Err(ProviderError::Queue("attributes failed (injected)".to_string()));
        }

        let now = self.clock.now();
        let mut attributes = HashMap::new();
        for name in names {
            let value = match name {
                QueueAttribute::ApproximateNumberOfMessages => state.visible.len() as i64,
                QueueAttribute::ApproximateNumberOfMessagesNotVisible => {
                    state.in_flight.len() as i64
                }
                QueueAttribute::ApproximateAgeOfOldestMessage => state
                    .messages
                    .values()
                    .map(|m| m.sent_at)
                    .min()
                    .map(|oldest| (now - oldest).num_seconds())
                    .unwrap_or(0),
            };
            attributes.insert(*name, value);
        }
        Ok(attributes)
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    published: Vec<(String, MetricDatum)>,
    fail_publish: bool,
    fail_query: bool,
}

/// In-memory [`MetricsSink`] that records everything it is given.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    state: Mutex<MetricsState>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_publish(&self, fail: bool) {
        self.state.lock().await.fail_publish = fail;
    }

    pub async fn fail_query(&self, fail: bool) {
        self.state.lock().await.fail_query = fail;
    }

    /// Store a datum directly, bypassing fault injection.
    pub async fn record(&self, namespace: &str, datum: MetricDatum) {
        self.state
            .lock()
            .await
            .published
            .push((namespace.to_string(), datum));
    }

    /// Every datum published so far, across namespaces.
    pub async fn published(&self) -> Vec<MetricDatum> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Published data points with the given metric name.
    pub async fn published_named(&self, name: &str) -> Vec<MetricDatum> {
        self.published()
            .await
            .into_iter()
            .filter(|d| d.name == name)
            .collect()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn publish(&self, namespace: &str, data: Vec<MetricDatum>) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        if state.fail_publish {
            return Err(ProviderError::Metrics("publish failed (injected)".to_string()));
        }
        state
            .published
            .extend(data.into_iter().map(|d| (namespace.to_string(), d)));
        Ok(())
    }

    async fn query(&self, query: &MetricQuery) -> Result<Vec<MetricPoint>, ProviderError> {
        let state = self.state.lock().await;
        if state.fail_query {
            return Err(ProviderError::Metrics("query failed (injected)".to_string()));
        }

        let samples = state
            .published
            .iter()
            .filter(|(ns, d)| {
                ns == &query.namespace
                    && d.name == query.metric
                    && query
                        .dimensions
                        .iter()
                        .all(|(k, v)| d.dimensions.get(k) == Some(v))
            })
            .map(|(_, d)| (d.timestamp, d.value));

        Ok(aggregate_points(query, samples))
    }
}

#[derive(Debug, Default)]
struct AlertState {
    notifications: Vec<(String, serde_json::Value)>,
    fail: bool,
}

/// [`AlertChannel`] that keeps every notification for inspection.
#[derive(Default)]
pub struct RecordingAlertChannel {
    state: Mutex<AlertState>,
}

impl RecordingAlertChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail(&self, fail: bool) {
        self.state.lock().await.fail = fail;
    }

    /// `(subject, payload)` pairs in delivery order.
    pub async fn notifications(&self) -> Vec<(String, serde_json::Value)> {
        self.state.lock().await.notifications.clone()
    }
}

#[async_trait]
impl AlertChannel for RecordingAlertChannel {
    async fn notify(&self, subject: &str, payload: &serde_json::Value) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        if state.fail {
            return Err(ProviderError::AlertChannel("notify failed (injected)".to_string()));
        }
        state
            .notifications
            .push((subject.to_string(), payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ManualClock;
    use crate::types::MetricUnit;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_receive_increments_count_and_hides_message() {
        let queue = InMemoryQueue::new("dlq");
        queue.seed("m1", "{}", 3).await;

        let batch = queue.receive_batch(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].receive_count, 3);

        // In flight: a second receive sees nothing
        let again = queue.receive_batch(10, Duration::ZERO).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(queue.in_flight_count().await, 1);
    }

    #[tokio::test]
    async fn test_release_makes_message_visible_again() {
        let queue = InMemoryQueue::new("dlq");
        queue.seed("m1", "{}", 1).await;

        let batch = queue.receive_batch(10, Duration::ZERO).await.unwrap();
        queue.release(&batch[0].receipt_handle).await.unwrap();

        let again = queue.receive_batch(10, Duration::ZERO).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 1);
    }

    #[tokio::test]
    async fn test_release_returns_the_receive_charge() {
        let queue = InMemoryQueue::new("dlq");
        queue.seed("m1", "{}", 5).await;

        for _ in 0..3 {
            let batch = queue.receive_batch(1, Duration::ZERO).await.unwrap();
            assert_eq!(batch[0].receive_count, 5);
            queue.release(&batch[0].receipt_handle).await.unwrap();
        }
        let stored = queue.messages().await;
        assert_eq!(stored[0].receive_count, 4);
    }

    #[tokio::test]
    async fn test_delete_with_stale_receipt_fails() {
        let queue = InMemoryQueue::new("dlq");
        queue.seed("m1", "{}", 1).await;

        let first = queue.receive_batch(1, Duration::ZERO).await.unwrap();
        queue.release(&first[0].receipt_handle).await.unwrap();
        let second = queue.receive_batch(1, Duration::ZERO).await.unwrap();

        assert!(queue.delete(&first[0].receipt_handle).await.is_err());
        queue.delete(&second[0].receipt_handle).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_attributes_report_depth_and_age() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let queue = InMemoryQueue::with_clock("dlq", Arc::new(clock.clone()));
        queue.seed("m1", "{}", 1).await;
        queue.seed("m2", "{}", 1).await;
        clock.advance(chrono::Duration::seconds(90));

        queue.receive_batch(1, Duration::ZERO).await.unwrap();

        let attrs = queue
            .attributes(&[
                QueueAttribute::ApproximateNumberOfMessages,
                QueueAttribute::ApproximateNumberOfMessagesNotVisible,
                QueueAttribute::ApproximateAgeOfOldestMessage,
            ])
            .await
            .unwrap();
        assert_eq!(attrs[&QueueAttribute::ApproximateNumberOfMessages], 1);
        assert_eq!(attrs[&QueueAttribute::ApproximateNumberOfMessagesNotVisible], 1);
        assert_eq!(attrs[&QueueAttribute::ApproximateAgeOfOldestMessage], 90);
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let queue = InMemoryQueue::new("primary");
        queue.fail_sends_containing(Some("poison")).await;

        assert!(queue.send("{\"poison\":true}", &MessageAttributes::new()).await.is_err());
        assert!(queue.send("{}", &MessageAttributes::new()).await.is_ok());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_metrics_query_filters_by_dimension() {
        let sink = InMemoryMetricsSink::new();
        let now = Utc::now();
        sink.publish(
            "ns",
            vec![
                MetricDatum::new("MessageCount", 4.0, MetricUnit::Count)
                    .with_dimension("QueueName", "a")
                    .at(now),
                MetricDatum::new("MessageCount", 40.0, MetricUnit::Count)
                    .with_dimension("QueueName", "b")
                    .at(now),
            ],
        )
        .await
        .unwrap();

        let mut dimensions = BTreeMap::new();
        dimensions.insert("QueueName".to_string(), "a".to_string());
        let points = sink
            .query(&MetricQuery {
                namespace: "ns".to_string(),
                metric: "MessageCount".to_string(),
                dimensions,
                start: now - chrono::Duration::minutes(1),
                end: now + chrono::Duration::minutes(1),
                period_seconds: 120,
                statistic: crate::types::Statistic::Average,
            })
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 4.0);
    }

    #[tokio::test]
    async fn test_recording_channel_failure_switch() {
        let channel = RecordingAlertChannel::new();
        channel.notify("a", &serde_json::json!({})).await.unwrap();
        channel.fail(true).await;
        assert!(channel.notify("b", &serde_json::json!({})).await.is_err());
        assert_eq!(channel.notifications().await.len(), 1);
    }
}
