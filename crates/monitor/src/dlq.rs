//! Dead-letter queue monitor.
//!
//! Each tick:
//! 1. Reads queue depth and oldest-message age from the queue provider
//! 2. Derives the arrival rate from previously published depth metrics
//! 3. Publishes the snapshot as metrics
//! 4. Evaluates alert rules and notifies the alert channel per breach
//!
//! The same snapshot + evaluation path backs the on-demand health check and
//! dashboard, without publishing or notifying.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use courier_common::config::AppConfig;
use courier_common::error::ProviderError;
use courier_common::providers::{AlertChannel, Clock, MetricsSink, QueueAttribute, QueueProvider};
use courier_common::types::{
    Alert, AlertKind, AlertRule, HealthStatus, MetricDatum, MetricPoint, MetricQuery, MetricUnit,
    QueueSnapshot, Statistic,
};

use crate::rules;

/// Metric holding the visible depth of the queue.
pub const MESSAGE_COUNT_METRIC: &str = "MessageCount";

/// Static configuration of a [`DlqMonitor`].
#[derive(Debug, Clone, PartialEq)]
pub struct DlqMonitorConfig {
    pub queue_name: String,
    pub namespace: String,
    pub interval: Duration,
    pub rules: Vec<AlertRule>,
    /// Window over which the arrival rate is measured.
    pub rate_window: Duration,
    /// How far back the dashboard series reaches.
    pub dashboard_window: Duration,
    pub dashboard_period: Duration,
}

impl DlqMonitorConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            namespace: "Courier/Notifications".to_string(),
            interval: Duration::from_secs(60),
            rules: vec![
                AlertRule::new(AlertKind::Accumulation, 10.0),
                AlertRule::new(AlertKind::Staleness, 3600.0),
                AlertRule::new(AlertKind::HighRate, 5.0),
            ],
            rate_window: Duration::from_secs(5 * 60),
            dashboard_window: Duration::from_secs(24 * 3600),
            dashboard_period: Duration::from_secs(3600),
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Self {
        Self::new(config.dlq_name.clone())
            .with_namespace(config.metrics_namespace.clone())
            .with_interval(Duration::from_secs(config.dlq_monitor_interval_secs))
            .with_rules(vec![
                AlertRule::new(AlertKind::Accumulation, config.dlq_accumulation_threshold),
                AlertRule::new(AlertKind::Staleness, config.dlq_staleness_threshold_secs),
                AlertRule::new(AlertKind::HighRate, config.dlq_rate_threshold),
            ])
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = rules;
        self
    }
}

/// Lifecycle state of the scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Running,
}

/// Result of an on-demand health evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub snapshot: QueueSnapshot,
    pub alerts: Vec<Alert>,
    pub checked_at: DateTime<Utc>,
}

/// Health plus trailing history and recommendations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
    pub health: HealthReport,
    pub message_count_series: Vec<MetricPoint>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

struct MonitorCore {
    config: DlqMonitorConfig,
    queue: Arc<dyn QueueProvider>,
    metrics: Arc<dyn MetricsSink>,
    alerts: Arc<dyn AlertChannel>,
    clock: Arc<dyn Clock>,
}

struct ScheduledTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic DLQ observer with alerting.
pub struct DlqMonitor {
    core: Arc<MonitorCore>,
    task: Option<ScheduledTask>,
}

impl DlqMonitor {
    pub fn new(
        config: DlqMonitorConfig,
        queue: Arc<dyn QueueProvider>,
        metrics: Arc<dyn MetricsSink>,
        alerts: Arc<dyn AlertChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                config,
                queue,
                metrics,
                alerts,
                clock,
            }),
            task: None,
        }
    }

    pub fn config(&self) -> &DlqMonitorConfig {
        &self.core.config
    }

    pub fn state(&self) -> MonitorState {
        match &self.task {
            Some(task) if !task.handle.is_finished() => MonitorState::Running,
            _ => MonitorState::Idle,
        }
    }

    /// Spawn the scheduled task. The first tick runs immediately.
    ///
    /// Calling this while already running does nothing.
    pub fn start(&mut self) {
        if self.state() == MonitorState::Running {
            tracing::info!(queue = %self.core.config.queue_name, "DLQ monitor already running");
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(core.run(shutdown_rx));
        self.task = Some(ScheduledTask { shutdown, handle });

        tracing::info!(
            queue = %self.core.config.queue_name,
            interval_secs = self.core.config.interval.as_secs(),
            "DLQ monitor started"
        );
    }

    /// Signal the scheduled task to stop and wait for it.
    ///
    /// A tick in progress completes first.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            tracing::debug!(queue = %self.core.config.queue_name, "DLQ monitor not running");
            return;
        };

        // The receiver is gone if the task already exited
        let _ = task.shutdown.send(());
        if let Err(e) = task.handle.await {
            tracing::error!(error = %e, "DLQ monitor task ended abnormally");
        }

        tracing::info!(queue = %self.core.config.queue_name, "DLQ monitor stopped");
    }

    /// Run one scheduled tick now. Returns the alerts raised.
    pub async fn tick(&self) -> Result<Vec<Alert>, ProviderError> {
        self.core.tick().await
    }

    /// Take a snapshot and publish it. Errors propagate.
    pub async fn collect_and_publish_metrics(&self) -> Result<QueueSnapshot, ProviderError> {
        let snapshot = self.core.snapshot().await?;
        self.core.publish(&snapshot).await?;
        Ok(snapshot)
    }

    /// Evaluate the configured rules against a snapshot.
    pub fn evaluate(&self, snapshot: &QueueSnapshot) -> Vec<Alert> {
        rules::evaluate_rules(&self.core.config.rules, snapshot)
    }

    /// Current health. Publishes nothing and sends no alerts.
    pub async fn get_health_status(&self) -> Result<HealthReport, ProviderError> {
        self.core.health().await
    }

    /// Health plus the trailing depth series and recommendations.
    pub async fn get_dashboard_data(&self) -> Result<DashboardData, ProviderError> {
        let health = self.core.health().await?;

        let config = &self.core.config;
        let now = self.core.clock.now();
        let query = MetricQuery {
            namespace: config.namespace.clone(),
            metric: MESSAGE_COUNT_METRIC.to_string(),
            dimensions: self.core.dimensions(),
            start: now - to_chrono(config.dashboard_window),
            end: now,
            period_seconds: config.dashboard_period.as_secs(),
            statistic: Statistic::Average,
        };
        let message_count_series = self.core.metrics.query(&query).await?;
        let recommendations = rules::recommendations(&health.alerts);

        Ok(DashboardData {
            health,
            message_count_series,
            recommendations,
            generated_at: now,
        })
    }
}

impl Drop for DlqMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.handle.abort();
        }
    }
}

impl MonitorCore {
    async fn run(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(alerts) => {
                            tracing::debug!(
                                queue = %self.config.queue_name,
                                alerts = alerts.len(),
                                "DLQ monitor tick complete"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                queue = %self.config.queue_name,
                                error = %e,
                                "DLQ monitor tick failed"
                            );
                        }
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<Vec<Alert>, ProviderError> {
        let snapshot = self.snapshot().await?;
        self.publish(&snapshot).await?;

        let alerts = rules::evaluate_rules(&self.config.rules, &snapshot);
        for alert in &alerts {
            self.deliver(alert).await;
        }
        Ok(alerts)
    }

    async fn health(&self) -> Result<HealthReport, ProviderError> {
        let snapshot = self.snapshot().await?;
        let alerts = rules::evaluate_rules(&self.config.rules, &snapshot);
        Ok(HealthReport {
            status: rules::health_from_alerts(&alerts),
            snapshot,
            alerts,
            checked_at: self.clock.now(),
        })
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, ProviderError> {
        let attributes = self
            .queue
            .attributes(&[
                QueueAttribute::ApproximateNumberOfMessages,
                QueueAttribute::ApproximateAgeOfOldestMessage,
            ])
            .await?;
        let count = attributes
            .get(&QueueAttribute::ApproximateNumberOfMessages)
            .copied()
            .unwrap_or(0);
        let age = attributes
            .get(&QueueAttribute::ApproximateAgeOfOldestMessage)
            .copied()
            .unwrap_or(0);

        let rate = self.arrival_rate().await?;

        Ok(QueueSnapshot::new(
            self.config.queue_name.clone(),
            count,
            age,
            rate,
            self.clock.now(),
        ))
    }

    /// Growth of the average depth between the last two rate windows.
    ///
    /// Never negative; 0 when either window has no data.
    async fn arrival_rate(&self) -> Result<f64, ProviderError> {
        let window = to_chrono(self.config.rate_window);
        // Metric buckets are keyed in whole milliseconds
        let now = self.clock.now().trunc_subsecs(3);
        let start = now - window * 2;
        let query = MetricQuery {
            namespace: self.config.namespace.clone(),
            metric: MESSAGE_COUNT_METRIC.to_string(),
            dimensions: self.dimensions(),
            start,
            end: now,
            period_seconds: self.config.rate_window.as_secs(),
            statistic: Statistic::Average,
        };
        let points = self.metrics.query(&query).await?;

        let boundary = start + window;
        let previous = points.iter().find(|p| p.timestamp < boundary).map(|p| p.value);
        let current = points.iter().find(|p| p.timestamp >= boundary).map(|p| p.value);
        let rate = match (previous, current) {
            (Some(previous), Some(current)) => (current - previous).max(0.0),
            _ => 0.0,
        };
        Ok(rate)
    }

    async fn publish(&self, snapshot: &QueueSnapshot) -> Result<(), ProviderError> {
        let queue = &snapshot.queue_id;
        let data = vec![
            MetricDatum::new(MESSAGE_COUNT_METRIC, snapshot.message_count as f64, MetricUnit::Count),
            MetricDatum::new(
                "OldestMessageAgeSeconds",
                snapshot.oldest_message_age_seconds as f64,
                MetricUnit::Seconds,
            ),
            MetricDatum::new("ArrivalRate", snapshot.arrival_rate_per_window, MetricUnit::Count),
        ]
        .into_iter()
        .map(|d| d.with_dimension("QueueName", queue.clone()).at(snapshot.taken_at))
        .collect();

        self.metrics.publish(&self.config.namespace, data).await?;

        tracing::info!(
            queue = %queue,
            message_count = snapshot.message_count,
            oldest_age_secs = snapshot.oldest_message_age_seconds,
            arrival_rate = snapshot.arrival_rate_per_window,
            "Published DLQ snapshot"
        );
        Ok(())
    }

    async fn deliver(&self, alert: &Alert) {
        let subject = format!(
            "[{}] DLQ {} alert: {}",
            alert.severity.to_string().to_uppercase(),
            alert.kind,
            alert.snapshot.queue_id
        );

        tracing::warn!(
            queue = %alert.snapshot.queue_id,
            kind = %alert.kind,
            severity = %alert.severity,
            observed = alert.observed_value,
            threshold = alert.threshold,
            "DLQ alert raised"
        );

        let payload = match serde_json::to_value(alert) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize DLQ alert");
                return;
            }
        };

        if let Err(e) = self.alerts.notify(&subject, &payload).await {
            tracing::error!(subject = %subject, error = %e, "Failed to deliver DLQ alert");
        }
    }

    fn dimensions(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("QueueName".to_string(), self.config.queue_name.clone())])
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use courier_common::memory::{InMemoryMetricsSink, InMemoryQueue, RecordingAlertChannel};
    use courier_common::providers::ManualClock;

    struct Fixture {
        queue: Arc<InMemoryQueue>,
        metrics: Arc<InMemoryMetricsSink>,
        alerts: Arc<RecordingAlertChannel>,
        clock: ManualClock,
        monitor: DlqMonitor,
    }

    fn make_fixture() -> Fixture {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let queue = Arc::new(InMemoryQueue::with_clock("dlq", Arc::new(clock.clone())));
        let metrics = Arc::new(InMemoryMetricsSink::new());
        let alerts = Arc::new(RecordingAlertChannel::new());
        let monitor = DlqMonitor::new(
            DlqMonitorConfig::new("dlq").with_namespace("test"),
            queue.clone(),
            metrics.clone(),
            alerts.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            queue,
            metrics,
            alerts,
            clock,
            monitor,
        }
    }

    async fn record_depth(f: &Fixture, minutes_ago: i64, value: f64) {
        let datum = MetricDatum::new(MESSAGE_COUNT_METRIC, value, MetricUnit::Count)
            .with_dimension("QueueName", "dlq")
            .at(f.clock.now() - chrono::Duration::minutes(minutes_ago));
        f.metrics.record("test", datum).await;
    }

    #[tokio::test]
    async fn test_rate_is_growth_between_windows() {
        let f = make_fixture();
        record_depth(&f, 8, 10.0).await;
        record_depth(&f, 2, 18.0).await;

        let snapshot = f.monitor.collect_and_publish_metrics().await.unwrap();
        assert_eq!(snapshot.arrival_rate_per_window, 8.0);
    }

    #[tokio::test]
    async fn test_rate_with_sub_millisecond_clock() {
        let f = make_fixture();
        f.clock.advance(chrono::Duration::nanoseconds(123_456));
        record_depth(&f, 8, 10.0).await;
        record_depth(&f, 2, 18.0).await;

        let snapshot = f.monitor.collect_and_publish_metrics().await.unwrap();
        assert_eq!(snapshot.arrival_rate_per_window, 8.0);
    }

    #[tokio::test]
    async fn test_draining_queue_has_zero_rate() {
        let f = make_fixture();
        record_depth(&f, 8, 40.0).await;
        record_depth(&f, 2, 5.0).await;

        let snapshot = f.monitor.collect_and_publish_metrics().await.unwrap();
        assert_eq!(snapshot.arrival_rate_per_window, 0.0);
    }

    #[tokio::test]
    async fn test_rate_without_history_is_zero() {
        let f = make_fixture();
        record_depth(&f, 2, 30.0).await;

        let snapshot = f.monitor.collect_and_publish_metrics().await.unwrap();
        assert_eq!(snapshot.arrival_rate_per_window, 0.0);
    }

    #[tokio::test]
    async fn test_snapshot_reads_depth_and_age() {
        let f = make_fixture();
        let sent_at = f.clock.now() - chrono::Duration::minutes(30);
        f.queue.seed_sent_at("m1", "{}", 1, sent_at).await;
        f.queue.seed("m2", "{}", 1).await;

        let snapshot = f.monitor.collect_and_publish_metrics().await.unwrap();
        assert_eq!(snapshot.message_count, 2);
        assert_eq!(snapshot.oldest_message_age_seconds, 1800);

        let published = f.metrics.published_named("OldestMessageAgeSeconds").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].value, 1800.0);
        assert_eq!(published[0].dimensions["QueueName"], "dlq");
    }

    #[tokio::test]
    async fn test_tick_notifies_each_breach() {
        let f = make_fixture();
        for i in 0..12 {
            f.queue.seed(&format!("m{}", i), "{}", 1).await;
        }

        let alerts = f.monitor.tick().await.unwrap();
        assert_eq!(alerts.len(), 1);

        let sent = f.alerts.notifications().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "[MEDIUM] DLQ accumulation alert: dlq");
        assert_eq!(sent[0].1["observed_value"], 12.0);
    }

    #[tokio::test]
    async fn test_tick_survives_alert_channel_failure() {
        let f = make_fixture();
        for i in 0..30 {
            f.queue.seed(&format!("m{}", i), "{}", 1).await;
        }
        f.alerts.fail(true).await;

        let alerts = f.monitor.tick().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(f.alerts.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_has_no_side_effects() {
        let f = make_fixture();
        for i in 0..60 {
            f.queue.seed(&format!("m{}", i), "{}", 1).await;
        }

        let report = f.monitor.get_health_status().await.unwrap();
        assert_eq!(report.status, HealthStatus::Critical);
        assert!(f.metrics.published().await.is_empty());
        assert!(f.alerts.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn test_on_demand_errors_propagate() {
        let f = make_fixture();
        f.queue.fail_attributes(true).await;
        assert!(f.monitor.collect_and_publish_metrics().await.is_err());
        assert!(f.monitor.get_health_status().await.is_err());
    }

    #[tokio::test]
    async fn test_dashboard_includes_series_and_recommendations() {
        let f = make_fixture();
        record_depth(&f, 150, 3.0).await;
        record_depth(&f, 30, 7.0).await;

        let dashboard = f.monitor.get_dashboard_data().await.unwrap();
        assert_eq!(dashboard.health.status, HealthStatus::Healthy);
        assert_eq!(dashboard.message_count_series.len(), 2);
        assert_eq!(dashboard.recommendations, vec!["No action needed".to_string()]);
    }
}
