//! Integration tests for the performance and DLQ monitors.
//!
//! All collaborators are in-memory and time is paused, so these run without
//! Redis and without real waiting.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use thiserror::Error;

use courier_common::memory::{InMemoryMetricsSink, InMemoryQueue, RecordingAlertChannel};
use courier_common::providers::ManualClock;
use courier_common::types::{
    AlertKind, AlertRule, AlertSeverity, HealthStatus, OperationKind, PerformanceSeverity,
    QueueSnapshot,
};
use courier_monitor::performance::{MonitorContext, PerformanceMonitor, ThresholdPair};
use courier_monitor::system::{SystemProbe, SystemSample};
use courier_monitor::{DlqMonitor, DlqMonitorConfig, MonitorError, MonitorState};

// ============================================================
// Shared helpers
// ============================================================

#[derive(Debug, Error, PartialEq)]
enum DeliveryError {
    #[error("provider rejected message: {0}")]
    Rejected(String),
}

struct FixedProbe(Option<SystemSample>);

impl SystemProbe for FixedProbe {
    fn sample(&self) -> io::Result<SystemSample> {
        self.0
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no procfs"))
    }
}

fn make_probe(resident: u64, limit: u64) -> Arc<dyn SystemProbe> {
    Arc::new(FixedProbe(Some(SystemSample {
        resident_bytes: resident,
        memory_limit_bytes: limit,
        cpu_time_ms: 1234,
    })))
}

fn make_performance_monitor() -> (PerformanceMonitor, Arc<InMemoryMetricsSink>) {
    let metrics = Arc::new(InMemoryMetricsSink::new());
    let monitor = PerformanceMonitor::new(metrics.clone(), "test", make_probe(10, 100));
    (monitor, metrics)
}

async fn take(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

struct DlqFixture {
    queue: Arc<InMemoryQueue>,
    alerts: Arc<RecordingAlertChannel>,
    monitor: DlqMonitor,
}

fn make_dlq_fixture() -> DlqFixture {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap());
    let queue = Arc::new(InMemoryQueue::with_clock("notifications-dlq", Arc::new(clock.clone())));
    let alerts = Arc::new(RecordingAlertChannel::new());
    let monitor = DlqMonitor::new(
        DlqMonitorConfig::new("notifications-dlq").with_namespace("test"),
        queue.clone(),
        Arc::new(InMemoryMetricsSink::new()),
        alerts.clone(),
        Arc::new(clock),
    );
    DlqFixture {
        queue,
        alerts,
        monitor,
    }
}

async fn seed_many(queue: &InMemoryQueue, n: usize) {
    for i in 0..n {
        queue.seed(&format!("m{}", i), r#"{"type":"comment.created"}"#, 1).await;
    }
}

// ============================================================
// PerformanceMonitor
// ============================================================

#[tokio::test(start_paused = true)]
async fn test_six_second_event_processing_is_slow() {
    let (monitor, metrics) = make_performance_monitor();

    let (result, sample) = monitor
        .measure(
            OperationKind::EventProcessing,
            "route_invocation",
            &MonitorContext::new(),
            async {
                take(6000).await;
                Ok::<_, DeliveryError>(7)
            },
        )
        .await;

    assert_eq!(result, Ok(7));
    assert_eq!(sample.elapsed_ms, 6000);
    assert_eq!(sample.severity, PerformanceSeverity::Slow);

    let durations = metrics.published_named("OperationDuration").await;
    assert_eq!(durations.len(), 1);
    assert_eq!(durations[0].value, 6000.0);
    assert_eq!(durations[0].dimensions["Severity"], "slow");
    assert_eq!(metrics.published_named("OperationSuccess").await.len(), 1);
    assert!(metrics.published_named("PerformanceAlert").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_reraised_with_one_failure_metric() {
    let (monitor, metrics) = make_performance_monitor();

    let result: Result<(), DeliveryError> = monitor
        .monitor_delivery("send_email", async {
            take(250).await;
            Err(DeliveryError::Rejected("mailbox full".to_string()))
        })
        .await;

    assert_eq!(result, Err(DeliveryError::Rejected("mailbox full".to_string())));

    let failures = metrics.published_named("OperationFailure").await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].dimensions["ErrorKind"], "DeliveryError");
    assert_eq!(failures[0].dimensions["Operation"], "send_email");
    assert!(metrics.published_named("OperationSuccess").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_metrics_outage_does_not_affect_result() {
    let (monitor, metrics) = make_performance_monitor();
    metrics.fail_publish(true).await;

    let ok = monitor
        .monitor_fan_out("publish_topic", async { Ok::<_, DeliveryError>("sent") })
        .await;
    assert_eq!(ok, Ok("sent"));

    let err: Result<(), DeliveryError> = monitor
        .monitor_fan_out("publish_topic", async {
            Err(DeliveryError::Rejected("throttled".to_string()))
        })
        .await;
    assert!(err.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_critical_delivery_raises_performance_alert() {
    let (monitor, metrics) = make_performance_monitor();

    monitor
        .monitor_delivery("send_email", async {
            take(12_000).await;
            Ok::<_, DeliveryError>(())
        })
        .await
        .unwrap();

    let alerts = metrics.published_named("PerformanceAlert").await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].dimensions["Threshold"], "critical");
    assert_eq!(alerts[0].dimensions["Severity"], "critical");
}

#[tokio::test(start_paused = true)]
async fn test_batch_publishes_size_and_throughput() {
    let (monitor, metrics) = make_performance_monitor();

    monitor
        .monitor_batch("digest_batch", 100, async {
            take(2000).await;
            Ok::<_, DeliveryError>(())
        })
        .await
        .unwrap();

    let size = metrics.published_named("BatchSize").await;
    assert_eq!(size[0].value, 100.0);
    let throughput = metrics.published_named("ItemsPerSecond").await;
    assert_eq!(throughput[0].value, 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_updated_thresholds_apply_to_new_monitor_only() {
    let (original, _) = make_performance_monitor();
    let tightened = original.with_thresholds(
        original
            .thresholds()
            .with(OperationKind::Delivery, ThresholdPair::new(100, 200)),
    );

    let op = || async {
        take(150).await;
        Ok::<_, DeliveryError>(())
    };
    let ctx = MonitorContext::new();
    let (_, before) = original.measure(OperationKind::Delivery, "send", &ctx, op()).await;
    let (_, after) = tightened.measure(OperationKind::Delivery, "send", &ctx, op()).await;

    assert_eq!(before.severity, PerformanceSeverity::Normal);
    assert_eq!(after.severity, PerformanceSeverity::Warning);
    assert_eq!(original.thresholds().delivery, ThresholdPair::new(3000, 10000));
}

#[tokio::test]
async fn test_system_health_bands() {
    let metrics = Arc::new(InMemoryMetricsSink::new());

    let healthy = PerformanceMonitor::new(metrics.clone(), "test", make_probe(50, 100));
    assert_eq!(
        healthy.monitor_system_health().await.unwrap().status,
        HealthStatus::Healthy
    );

    let warning = PerformanceMonitor::new(metrics.clone(), "test", make_probe(80, 100));
    assert_eq!(
        warning.monitor_system_health().await.unwrap().status,
        HealthStatus::Warning
    );

    let critical = PerformanceMonitor::new(metrics.clone(), "test", make_probe(95, 100));
    let report = critical.monitor_system_health().await.unwrap();
    assert_eq!(report.status, HealthStatus::Critical);
    assert_eq!(report.cpu_time_ms, 1234);

    let published = metrics.published_named("MemoryUtilization").await;
    assert_eq!(published.len(), 3);
    assert_eq!(published[2].value, 95.0);
}

#[tokio::test]
async fn test_system_health_probe_failure_propagates() {
    let monitor = PerformanceMonitor::new(
        Arc::new(InMemoryMetricsSink::new()),
        "test",
        Arc::new(FixedProbe(None)),
    );
    let err = monitor.monitor_system_health().await.unwrap_err();
    assert!(matches!(err, MonitorError::Probe(_)));
}

// ============================================================
// DlqMonitor
// ============================================================

#[test]
fn test_accumulation_of_25_against_10_is_single_high_alert() {
    let f = make_dlq_fixture();
    let monitor = DlqMonitor::new(
        f.monitor
            .config()
            .clone()
            .with_rules(vec![AlertRule::new(AlertKind::Accumulation, 10.0)]),
        f.queue.clone(),
        Arc::new(InMemoryMetricsSink::new()),
        f.alerts.clone(),
        Arc::new(ManualClock::new(Utc::now())),
    );

    let busy = QueueSnapshot::new("notifications-dlq", 25, 0, 0.0, Utc::now());
    let alerts = monitor.evaluate(&busy);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::Accumulation);
    assert_eq!(alerts[0].severity, AlertSeverity::High);

    let quiet = QueueSnapshot::new("notifications-dlq", 5, 0, 0.0, Utc::now());
    assert!(monitor.evaluate(&quiet).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_ticks_until_stopped() {
    let mut f = make_dlq_fixture();
    seed_many(&f.queue, 25).await;

    assert_eq!(f.monitor.state(), MonitorState::Idle);
    f.monitor.start();
    assert_eq!(f.monitor.state(), MonitorState::Running);

    // First tick runs immediately
    take(1).await;
    let sent = f.alerts.notifications().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "[HIGH] DLQ accumulation alert: notifications-dlq");

    take(60_000).await;
    assert_eq!(f.alerts.notifications().await.len(), 2);

    f.monitor.stop().await;
    assert_eq!(f.monitor.state(), MonitorState::Idle);

    take(180_000).await;
    assert_eq!(f.alerts.notifications().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_noop() {
    let mut f = make_dlq_fixture();
    seed_many(&f.queue, 25).await;

    f.monitor.start();
    f.monitor.start();
    take(1).await;

    assert_eq!(f.alerts.notifications().await.len(), 1);
    f.monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_tick_does_not_stop_schedule() {
    let mut f = make_dlq_fixture();
    seed_many(&f.queue, 25).await;
    f.queue.fail_attributes(true).await;

    f.monitor.start();
    take(1).await;
    assert!(f.alerts.notifications().await.is_empty());
    assert_eq!(f.monitor.state(), MonitorState::Running);

    f.queue.fail_attributes(false).await;
    take(60_000).await;
    assert_eq!(f.alerts.notifications().await.len(), 1);

    f.monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_idle_is_harmless() {
    let mut f = make_dlq_fixture();
    f.monitor.stop().await;
    assert_eq!(f.monitor.state(), MonitorState::Idle);
}

#[tokio::test]
async fn test_health_reports_critical_for_large_backlog() {
    let f = make_dlq_fixture();
    seed_many(&f.queue, 75).await;

    let report = f.monitor.get_health_status().await.unwrap();
    assert_eq!(report.status, HealthStatus::Critical);
    assert_eq!(report.snapshot.message_count, 75);
    assert_eq!(report.alerts[0].severity, AlertSeverity::Critical);
    assert!(f.alerts.notifications().await.is_empty());
}
