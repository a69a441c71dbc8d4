//! Operational monitoring: operation latency and dead-letter queue health.

pub mod dlq;
pub mod performance;
pub mod rules;
pub mod system;

use thiserror::Error;

use courier_common::error::ProviderError;

pub use dlq::{DashboardData, DlqMonitor, DlqMonitorConfig, HealthReport, MonitorState};
pub use performance::{PerformanceMonitor, PerformanceThresholds, SystemHealth, ThresholdPair};

/// Errors surfaced by on-demand monitoring calls.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("System probe failed: {0}")]
    Probe(#[from] std::io::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
