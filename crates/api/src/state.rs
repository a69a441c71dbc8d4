//! Shared application state for the Axum API server.

use std::sync::Arc;

use tokio::sync::RwLock;

use courier_monitor::{DlqMonitor, PerformanceMonitor};
use courier_reprocessor::DlqReprocessor;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub dlq_monitor: Arc<DlqMonitor>,
    pub reprocessor: Arc<DlqReprocessor>,
    /// Replaced wholesale when thresholds are updated.
    pub performance: Arc<RwLock<PerformanceMonitor>>,
}

impl AppState {
    pub fn new(
        dlq_monitor: DlqMonitor,
        reprocessor: DlqReprocessor,
        performance: PerformanceMonitor,
    ) -> Self {
        Self {
            dlq_monitor: Arc::new(dlq_monitor),
            reprocessor: Arc::new(reprocessor),
            performance: Arc::new(RwLock::new(performance)),
        }
    }
}
