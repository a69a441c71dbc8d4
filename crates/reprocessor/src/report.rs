//! Report rendering and persistence.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::PgPool;

use courier_common::types::{OutcomeStatus, ReprocessingReport};

use crate::ReprocessError;

/// Durable destination for reprocessing reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn save(&self, report: &ReprocessingReport, summary: &str) -> Result<(), ReprocessError>;
}

/// Render the human-readable Markdown summary of a report.
pub fn render_summary(report: &ReprocessingReport) -> String {
    let mode = if report.dry_run { "Dry run" } else { "Live" };

    let mut lines = vec![
        "# DLQ Reprocessing Report".to_string(),
        String::new(),
        format!("- Report ID: `{}`", report.id),
        format!("- Mode: {}", mode),
        format!("- Started: {}", report.started_at.to_rfc3339()),
        format!("- Finished: {}", report.finished_at.to_rfc3339()),
        format!("- Duration: {} ms", report.duration_ms),
        String::new(),
        "## Totals".to_string(),
        String::new(),
        "| Status | Count |".to_string(),
        "|---|---|".to_string(),
        format!("| Total | {} |", report.total),
        format!("| Success | {} |", report.success_count),
        format!("| Failed | {} |", report.failed_count),
        format!("| Skipped | {} |", report.skipped_count),
        format!("| Success rate | {:.1}% |", report.success_rate_percent),
        String::new(),
    ];

    for (status, title) in [
        (OutcomeStatus::Success, "Successful"),
        (OutcomeStatus::Failed, "Failed"),
        (OutcomeStatus::Skipped, "Skipped"),
    ] {
        let outcomes: Vec<_> = report.outcomes_with(status).collect();
        if outcomes.is_empty() {
            continue;
        }
        lines.push(format!("## {} ({})", title, outcomes.len()));
        lines.push(String::new());
        lines.extend(outcomes.iter().map(|outcome| match &outcome.detail {
            Some(detail) => format!("- `{}` - {} ({})", outcome.message_id, outcome.reason, detail),
            None => format!("- `{}` - {}", outcome.message_id, outcome.reason),
        }));
        lines.push(String::new());
    }

    lines.push("## Recommendations".to_string());
    lines.push(String::new());
    lines.extend(recommendations(report).into_iter().map(|r| format!("- {}", r)));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn recommendations(report: &ReprocessingReport) -> Vec<&'static str> {
    let mut recs = Vec::new();
    if report.failed_count > 0 {
        recs.push(
            "Check the primary queue consumer and downstream providers before retrying failed messages",
        );
    }
    if report.skipped_count > 0 {
        recs.push("Inspect skipped messages and archive poison messages instead of retrying them");
    }
    if report.success_count > 0 && !report.dry_run {
        recs.push("Watch the primary queue while the resubmitted messages are consumed");
    }
    if report.success_count > 0 && report.dry_run {
        recs.push("Run again without --dry-run to reprocess the messages listed above");
    }
    if recs.is_empty() {
        recs.push("No action needed");
    }
    recs
}

/// Writes `<stem>.json` and `<stem>.md` into a directory, with the stem
/// derived from the run's start time.
pub struct FileReportStore {
    dir: PathBuf,
}

impl FileReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `(json, markdown)` paths for a report.
    pub fn paths_for(&self, report: &ReprocessingReport) -> (PathBuf, PathBuf) {
        let stem = format!(
            "reprocess-{}",
            report.started_at.format("%Y-%m-%dT%H-%M-%S%.3fZ")
        );
        (
            self.dir.join(format!("{}.json", stem)),
            self.dir.join(format!("{}.md", stem)),
        )
    }
}

#[async_trait]
impl ReportStore for FileReportStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn save(&self, report: &ReprocessingReport, summary: &str) -> Result<(), ReprocessError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let (json_path, md_path) = self.paths_for(report);
        tokio::fs::write(&json_path, serde_json::to_vec_pretty(report)?).await?;
        tokio::fs::write(&md_path, summary).await?;

        tracing::info!(
            json = %json_path.display(),
            summary = %md_path.display(),
            "Reprocessing report written"
        );
        Ok(())
    }
}

/// Inserts one row per report into `reprocessing_reports`.
pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn save(&self, report: &ReprocessingReport, summary: &str) -> Result<(), ReprocessError> {
        sqlx::query(
            r#"
            INSERT INTO reprocessing_reports (
                id, dry_run, started_at, finished_at,
                total, success_count, failed_count, skipped_count,
                duration_ms, success_rate_percent, report, summary
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(report.id)
        .bind(report.dry_run)
        .bind(report.started_at)
        .bind(report.finished_at)
        .bind(report.total as i32)
        .bind(report.success_count as i32)
        .bind(report.failed_count as i32)
        .bind(report.skipped_count as i32)
        .bind(report.duration_ms as i64)
        .bind(report.success_rate_percent)
        .bind(sqlx::types::Json(report))
        .bind(summary)
        .execute(&self.pool)
        .await?;

        tracing::info!(report_id = %report.id, "Reprocessing report stored");
        Ok(())
    }
}
