//! Operation timing with severity banding.
//!
//! [`PerformanceMonitor::monitor`] wraps any fallible future: it times it,
//! bands the elapsed time against per-kind thresholds, logs, and publishes
//! metrics. The wrapped result is always returned unchanged. Metric publish
//! failures are logged and never reach the caller.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use courier_common::providers::MetricsSink;
use courier_common::types::{
    HealthStatus, MetricDatum, MetricUnit, OperationKind, PerformanceSample, PerformanceSeverity,
};

use crate::MonitorError;
use crate::system::SystemProbe;

/// Free-form key/value context attached to an operation's logs.
pub type MonitorContext = BTreeMap<String, String>;

/// Warning and critical latency thresholds for one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub warning_ms: u64,
    pub critical_ms: u64,
}

impl ThresholdPair {
    pub const fn new(warning_ms: u64, critical_ms: u64) -> Self {
        Self {
            warning_ms,
            critical_ms,
        }
    }
}

/// Thresholds for every [`OperationKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    pub event_processing: ThresholdPair,
    pub delivery: ThresholdPair,
    pub batch_processing: ThresholdPair,
    pub fan_out_publish: ThresholdPair,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            event_processing: ThresholdPair::new(5_000, 30_000),
            delivery: ThresholdPair::new(3_000, 10_000),
            batch_processing: ThresholdPair::new(10_000, 60_000),
            fan_out_publish: ThresholdPair::new(2_000, 5_000),
        }
    }
}

impl PerformanceThresholds {
    pub fn get(&self, kind: OperationKind) -> ThresholdPair {
        match kind {
            OperationKind::EventProcessing => self.event_processing,
            OperationKind::Delivery => self.delivery,
            OperationKind::BatchProcessing => self.batch_processing,
            OperationKind::FanOutPublish => self.fan_out_publish,
        }
    }

    /// Copy with the pair for `kind` replaced.
    pub fn with(mut self, kind: OperationKind, pair: ThresholdPair) -> Self {
        match kind {
            OperationKind::EventProcessing => self.event_processing = pair,
            OperationKind::Delivery => self.delivery = pair,
            OperationKind::BatchProcessing => self.batch_processing = pair,
            OperationKind::FanOutPublish => self.fan_out_publish = pair,
        }
        self
    }

    /// Every pair must have `0 < warning < critical`.
    pub fn validate(&self) -> Result<(), String> {
        for kind in OperationKind::ALL {
            let pair = self.get(kind);
            if pair.warning_ms == 0 || pair.warning_ms >= pair.critical_ms {
                return Err(format!(
                    "{}: warning_ms ({}) must be > 0 and < critical_ms ({})",
                    kind, pair.warning_ms, pair.critical_ms
                ));
            }
        }
        Ok(())
    }

    /// Band an elapsed time for `kind`.
    ///
    /// Event processing uses four bands with a slow/warning boundary at twice
    /// the warning threshold; every other kind goes straight from normal to
    /// warning.
    pub fn classify(&self, kind: OperationKind, elapsed_ms: u64) -> PerformanceSeverity {
        let pair = self.get(kind);
        if elapsed_ms >= pair.critical_ms {
            return PerformanceSeverity::Critical;
        }
        match kind {
            OperationKind::EventProcessing => {
                if elapsed_ms >= pair.warning_ms.saturating_mul(2) {
                    PerformanceSeverity::Warning
                } else if elapsed_ms >= pair.warning_ms {
                    PerformanceSeverity::Slow
                } else {
                    PerformanceSeverity::Normal
                }
            }
            _ if elapsed_ms >= pair.warning_ms => PerformanceSeverity::Warning,
            _ => PerformanceSeverity::Normal,
        }
    }
}

/// Result of [`PerformanceMonitor::monitor_system_health`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub memory_utilization_percent: f64,
    pub resident_bytes: u64,
    pub memory_limit_bytes: u64,
    pub uptime_seconds: u64,
    pub cpu_time_ms: u64,
    pub sampled_at: chrono::DateTime<Utc>,
}

/// Times operations and publishes latency metrics.
///
/// Cloning is cheap; clones share the metrics sink, probe and start time.
#[derive(Clone)]
pub struct PerformanceMonitor {
    metrics: Arc<dyn MetricsSink>,
    namespace: String,
    thresholds: PerformanceThresholds,
    probe: Arc<dyn SystemProbe>,
    started_at: Instant,
}

impl PerformanceMonitor {
    pub fn new(
        metrics: Arc<dyn MetricsSink>,
        namespace: impl Into<String>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        Self {
            metrics,
            namespace: namespace.into(),
            thresholds: PerformanceThresholds::default(),
            probe,
            started_at: Instant::now(),
        }
    }

    pub fn thresholds(&self) -> PerformanceThresholds {
        self.thresholds
    }

    /// A monitor identical to this one but using `thresholds`.
    pub fn with_thresholds(&self, thresholds: PerformanceThresholds) -> Self {
        Self {
            thresholds,
            ..self.clone()
        }
    }

    /// Time `fut`, record the outcome, and return its result unchanged.
    pub async fn monitor<T, E, F>(
        &self,
        kind: OperationKind,
        operation: &str,
        context: &MonitorContext,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.measure(kind, operation, context, fut).await.0
    }

    /// Like [`monitor`](Self::monitor), also returning the timing sample.
    pub async fn measure<T, E, F>(
        &self,
        kind: OperationKind,
        operation: &str,
        context: &MonitorContext,
        fut: F,
    ) -> (Result<T, E>, PerformanceSample)
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        tracing::debug!(kind = %kind, operation, ?context, "Operation started");

        let start = Instant::now();
        let result = fut.await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let sample = match &result {
            Ok(_) => self.record_success(kind, operation, context, elapsed_ms).await,
            Err(e) => {
                self.record_failure(kind, operation, context, elapsed_ms, short_type_name::<E>(), e)
                    .await;
                PerformanceSample {
                    kind,
                    operation: operation.to_string(),
                    elapsed_ms,
                    severity: self.thresholds.classify(kind, elapsed_ms),
                }
            }
        };

        (result, sample)
    }

    pub async fn monitor_event_processing<T, E, F>(&self, operation: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.monitor(OperationKind::EventProcessing, operation, &MonitorContext::new(), fut)
            .await
    }

    pub async fn monitor_delivery<T, E, F>(&self, operation: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.monitor(OperationKind::Delivery, operation, &MonitorContext::new(), fut)
            .await
    }

    pub async fn monitor_fan_out<T, E, F>(&self, operation: &str, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.monitor(OperationKind::FanOutPublish, operation, &MonitorContext::new(), fut)
            .await
    }

    /// Time a batch of `item_count` items; on success also publishes the
    /// batch size and throughput.
    pub async fn monitor_batch<T, E, F>(
        &self,
        operation: &str,
        item_count: usize,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut context = MonitorContext::new();
        context.insert("itemCount".to_string(), item_count.to_string());

        let (result, sample) = self
            .measure(OperationKind::BatchProcessing, operation, &context, fut)
            .await;

        if result.is_ok() {
            let per_second = if sample.elapsed_ms == 0 {
                item_count as f64
            } else {
                item_count as f64 * 1000.0 / sample.elapsed_ms as f64
            };
            self.emit(vec![
                self.datum("BatchSize", item_count as f64, MetricUnit::Count, &sample),
                self.datum("ItemsPerSecond", per_second, MetricUnit::CountPerSecond, &sample),
            ])
            .await;
        }

        result
    }

    /// Sample memory, uptime and CPU time, publish them, and band memory use.
    pub async fn monitor_system_health(&self) -> Result<SystemHealth, MonitorError> {
        let sample = self.probe.sample()?;
        let utilization = sample.utilization_percent();
        let uptime_seconds = self.started_at.elapsed().as_secs();

        let status = if utilization > 90.0 {
            tracing::error!(utilization_percent = utilization, "Memory utilization critical");
            HealthStatus::Critical
        } else if utilization > 75.0 {
            tracing::warn!(utilization_percent = utilization, "Memory utilization high");
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        self.emit(vec![
            MetricDatum::new("MemoryUtilization", utilization, MetricUnit::Percent),
            MetricDatum::new("UptimeSeconds", uptime_seconds as f64, MetricUnit::Seconds),
            MetricDatum::new("CpuTimeMillis", sample.cpu_time_ms as f64, MetricUnit::Milliseconds),
        ])
        .await;

        Ok(SystemHealth {
            status,
            memory_utilization_percent: utilization,
            resident_bytes: sample.resident_bytes,
            memory_limit_bytes: sample.memory_limit_bytes,
            uptime_seconds,
            cpu_time_ms: sample.cpu_time_ms,
            sampled_at: Utc::now(),
        })
    }

    async fn record_success(
        &self,
        kind: OperationKind,
        operation: &str,
        context: &MonitorContext,
        elapsed_ms: u64,
    ) -> PerformanceSample {
        let severity = self.thresholds.classify(kind, elapsed_ms);
        let sample = PerformanceSample {
            kind,
            operation: operation.to_string(),
            elapsed_ms,
            severity,
        };

        tracing::info!(
            kind = %kind,
            operation,
            elapsed_ms,
            severity = %severity,
            ?context,
            "Operation completed"
        );

        let mut data = vec![
            self.datum("OperationDuration", elapsed_ms as f64, MetricUnit::Milliseconds, &sample)
                .with_dimension("Severity", severity.to_string()),
            self.datum("OperationSuccess", 1.0, MetricUnit::Count, &sample),
        ];

        if severity >= PerformanceSeverity::Warning {
            let pair = self.thresholds.get(kind);
            let (threshold, threshold_ms) = if severity == PerformanceSeverity::Critical {
                ("critical", pair.critical_ms)
            } else {
                ("warning", pair.warning_ms)
            };
            tracing::warn!(
                kind = %kind,
                operation,
                elapsed_ms,
                threshold,
                threshold_ms,
                "Operation exceeded performance threshold"
            );
            data.push(
                self.datum("PerformanceAlert", 1.0, MetricUnit::Count, &sample)
                    .with_dimension("Severity", severity.to_string())
                    .with_dimension("Threshold", threshold),
            );
        }

        self.emit(data).await;
        sample
    }

    async fn record_failure(
        &self,
        kind: OperationKind,
        operation: &str,
        context: &MonitorContext,
        elapsed_ms: u64,
        error_kind: &str,
        error: &dyn Display,
    ) {
        tracing::error!(
            kind = %kind,
            operation,
            elapsed_ms,
            error_kind,
            error = %error,
            ?context,
            "Operation failed"
        );

        let datum = MetricDatum::new("OperationFailure", 1.0, MetricUnit::Count)
            .with_dimension("OperationKind", kind.to_string())
            .with_dimension("Operation", operation)
            .with_dimension("ErrorKind", error_kind);
        let duration = MetricDatum::new("OperationDuration", elapsed_ms as f64, MetricUnit::Milliseconds)
            .with_dimension("OperationKind", kind.to_string())
            .with_dimension("Operation", operation)
            .with_dimension("Outcome", "failure");
        self.emit(vec![datum, duration]).await;
    }

    fn datum(&self, name: &str, value: f64, unit: MetricUnit, sample: &PerformanceSample) -> MetricDatum {
        MetricDatum::new(name, value, unit)
            .with_dimension("OperationKind", sample.kind.to_string())
            .with_dimension("Operation", sample.operation.clone())
    }

    async fn emit(&self, data: Vec<MetricDatum>) {
        let count = data.len();
        if let Err(e) = self.metrics.publish(&self.namespace, data).await {
            tracing::warn!(error = %e, count, "Failed to publish performance metrics");
        }
    }
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
