//! Selective, throttled redrive of dead-lettered messages.

pub mod envelope;
pub mod report;
pub mod reprocessor;

use thiserror::Error;

use courier_common::error::ProviderError;

pub use report::{FileReportStore, PgReportStore, ReportStore, render_summary};
pub use reprocessor::{DlqReprocessor, ReprocessOptions, ReprocessorConfig};

/// Errors that abort a reprocessing pass or a report write.
///
/// Per-message provider failures never surface here; they become `Failed`
/// outcomes in the report.
#[derive(Debug, Error)]
pub enum ReprocessError {
    #[error("Invalid reprocess options: {0}")]
    InvalidOptions(String),

    #[error("Failed to drain DLQ: {0}")]
    Drain(#[source] ProviderError),

    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report database error: {0}")]
    Database(#[from] sqlx::Error),
}
