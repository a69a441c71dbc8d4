//! DLQ reprocessing pass.
//!
//! One pass:
//! 1. Drains the DLQ to build the full candidate set
//! 2. Filters by id allow-list and caps at `max_messages`
//! 3. Processes candidates in sequential batches with a fixed delay between
//!    batches, resubmitting valid messages to the primary queue and deleting
//!    them from the DLQ only after the resubmit succeeded
//! 4. Releases every drained message that was not deleted
//! 5. Builds, publishes and persists a [`ReprocessingReport`]
//!
//! Resubmit-then-delete is not atomic: a crash between the two leaves the
//! message in the DLQ and it will be resubmitted again on a later pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use courier_common::config::AppConfig;
use courier_common::providers::{Clock, MessageAttributes, MetricsSink, QueueProvider};
use courier_common::types::{
    DeadLetteredMessage, MetricDatum, MetricUnit, ReprocessingOutcome, ReprocessingReport,
};

use crate::ReprocessError;
use crate::envelope::validate_envelope;
use crate::report::{ReportStore, render_summary};

pub const REASON_RETRY_EXCEEDED: &str = "Exceeded maximum retry count";
pub const REASON_INVALID_FORMAT: &str = "Invalid message format";
pub const REASON_DRY_RUN: &str = "Dry run - would reprocess";
pub const REASON_REPROCESSED: &str = "Successfully reprocessed";
pub const REASON_RESUBMIT_FAILED: &str = "Failed to resubmit to primary queue";
pub const REASON_PROCESSING_ERROR: &str = "Processing error";

/// What to reprocess and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReprocessOptions {
    /// Only these message ids, when set.
    pub message_ids: Option<Vec<String>>,
    /// Accepted but not applied; see [`DlqReprocessor::reprocess_by_error_type`].
    pub error_types: Option<Vec<String>>,
    /// Hard cap on processed messages, applied after the id filter.
    pub max_messages: Option<usize>,
    pub dry_run: bool,
    pub validate_before_reprocess: bool,
    pub batch_size: usize,
}

impl Default for ReprocessOptions {
    fn default() -> Self {
        Self {
            message_ids: None,
            error_types: None,
            max_messages: None,
            dry_run: false,
            validate_before_reprocess: true,
            batch_size: 5,
        }
    }
}

impl ReprocessOptions {
    pub fn validate(&self) -> Result<(), ReprocessError> {
        if self.batch_size == 0 {
            return Err(ReprocessError::InvalidOptions(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Static configuration of a [`DlqReprocessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReprocessorConfig {
    /// Messages received more often than this are never resubmitted.
    pub max_receive_count: u32,
    pub batch_delay: Duration,
    /// Messages requested per receive while draining.
    pub receive_batch_size: usize,
    pub receive_wait: Duration,
    /// Cap used by [`DlqReprocessor::reprocess_all`].
    pub reprocess_all_limit: usize,
    pub namespace: String,
}

impl Default for ReprocessorConfig {
    fn default() -> Self {
        Self {
            max_receive_count: 5,
            batch_delay: Duration::from_secs(1),
            receive_batch_size: 10,
            receive_wait: Duration::from_secs(1),
            reprocess_all_limit: 100,
            namespace: "Courier/Notifications".to_string(),
        }
    }
}

impl ReprocessorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_receive_count: config.reprocess_max_receive_count,
            batch_delay: Duration::from_millis(config.reprocess_batch_delay_ms),
            namespace: config.metrics_namespace.clone(),
            ..Self::default()
        }
    }
}

/// Redrives messages from a DLQ to its primary queue.
pub struct DlqReprocessor {
    dlq: Arc<dyn QueueProvider>,
    primary: Arc<dyn QueueProvider>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    stores: Vec<Arc<dyn ReportStore>>,
    config: ReprocessorConfig,
}

impl DlqReprocessor {
    pub fn new(
        dlq: Arc<dyn QueueProvider>,
        primary: Arc<dyn QueueProvider>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
        config: ReprocessorConfig,
    ) -> Self {
        Self {
            dlq,
            primary,
            metrics,
            clock,
            stores: Vec::new(),
            config,
        }
    }

    /// Also persist every report to `store`.
    pub fn with_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.stores.push(store);
        self
    }

    pub fn config(&self) -> &ReprocessorConfig {
        &self.config
    }

    /// Reprocess only the given message ids.
    pub async fn reprocess_by_ids(
        &self,
        ids: Vec<String>,
        dry_run: bool,
    ) -> Result<ReprocessingReport, ReprocessError> {
        self.reprocess(&ReprocessOptions {
            message_ids: Some(ids),
            dry_run,
            ..ReprocessOptions::default()
        })
        .await
    }

    /// Reprocess messages that failed with the given error types.
    ///
    /// Matching needs failure analysis data that dead-lettered messages do
    /// not carry, so the filter is logged and otherwise ignored.
    pub async fn reprocess_by_error_type(
        &self,
        error_types: Vec<String>,
        dry_run: bool,
    ) -> Result<ReprocessingReport, ReprocessError> {
        self.reprocess(&ReprocessOptions {
            error_types: Some(error_types),
            dry_run,
            ..ReprocessOptions::default()
        })
        .await
    }

    /// Reprocess up to `reprocess_all_limit` messages. Dry run unless
    /// `dry_run` is explicitly false.
    pub async fn reprocess_all(
        &self,
        dry_run: Option<bool>,
    ) -> Result<ReprocessingReport, ReprocessError> {
        self.reprocess(&ReprocessOptions {
            max_messages: Some(self.config.reprocess_all_limit),
            dry_run: dry_run.unwrap_or(true),
            ..ReprocessOptions::default()
        })
        .await
    }

    /// Run one reprocessing pass.
    ///
    /// Only option validation and drain failures are errors; everything after
    /// the drain is reported per message.
    pub async fn reprocess(
        &self,
        options: &ReprocessOptions,
    ) -> Result<ReprocessingReport, ReprocessError> {
        options.validate()?;

        let started_at = self.clock.now();
        let timer = Instant::now();

        tracing::info!(
            dlq = %self.dlq.queue_name(),
            primary = %self.primary.queue_name(),
            dry_run = options.dry_run,
            batch_size = options.batch_size,
            max_messages = ?options.max_messages,
            "Starting DLQ reprocessing"
        );

        let drained = self.drain().await?;
        let candidates = self.select(&drained, options);

        if options.validate_before_reprocess {
            self.pre_validate(&candidates);
        }

        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut deleted = HashSet::new();

        for (i, batch) in candidates.chunks(options.batch_size).enumerate() {
            if i > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
            tracing::debug!(batch = i + 1, size = batch.len(), "Processing batch");

            for message in batch {
                let (outcome, was_deleted) = self.process_message(message, options.dry_run).await;
                if was_deleted {
                    deleted.insert(message.id.clone());
                }
                outcomes.push(outcome);
            }
        }

        self.release_undeleted(&drained, &deleted).await;

        let report = ReprocessingReport::from_outcomes(
            outcomes,
            options.dry_run,
            started_at,
            self.clock.now(),
            timer.elapsed().as_millis() as u64,
        );

        tracing::info!(
            report_id = %report.id,
            total = report.total,
            success = report.success_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            duration_ms = report.duration_ms,
            "DLQ reprocessing complete"
        );

        self.publish_metrics(&report).await;
        self.persist(&report).await;

        Ok(report)
    }

    /// Receive until the DLQ is empty. Drained messages stay in flight.
    async fn drain(&self) -> Result<Vec<DeadLetteredMessage>, ReprocessError> {
        let mut drained: Vec<DeadLetteredMessage> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        loop {
            let batch = match self
                .dlq
                .receive_batch(self.config.receive_batch_size, self.config.receive_wait)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    self.release_undeleted(&drained, &HashSet::new()).await;
                    return Err(ReprocessError::Drain(e));
                }
            };
            if batch.is_empty() {
                break;
            }
            for message in batch {
                // A lease that expired mid-drain redelivers the same message;
                // only the newest receipt is still valid
                match positions.get(&message.id) {
                    Some(&i) => drained[i] = message,
                    None => {
                        positions.insert(message.id.clone(), drained.len());
                        drained.push(message);
                    }
                }
            }
        }

        tracing::info!(count = drained.len(), "Drained DLQ");
        Ok(drained)
    }

    fn select<'a>(
        &self,
        drained: &'a [DeadLetteredMessage],
        options: &ReprocessOptions,
    ) -> Vec<&'a DeadLetteredMessage> {
        let mut candidates: Vec<&DeadLetteredMessage> = match &options.message_ids {
            Some(ids) => {
                let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
                drained.iter().filter(|m| ids.contains(m.id.as_str())).collect()
            }
            None => drained.iter().collect(),
        };

        if let Some(error_types) = &options.error_types
            && !error_types.is_empty()
        {
            tracing::warn!(
                error_types = ?error_types,
                "Error-type filtering needs failure analysis data that is not available; filter ignored"
            );
        }

        if let Some(max) = options.max_messages {
            candidates.truncate(max);
        }

        tracing::info!(
            drained = drained.len(),
            selected = candidates.len(),
            "Selected reprocessing candidates"
        );
        candidates
    }

    /// Flag malformed candidates up front. They are skipped when processed.
    fn pre_validate(&self, candidates: &[&DeadLetteredMessage]) {
        let invalid: Vec<&str> = candidates
            .iter()
            .filter(|m| validate_envelope(&m.body).is_err())
            .map(|m| m.id.as_str())
            .collect();

        if !invalid.is_empty() {
            tracing::warn!(
                count = invalid.len(),
                message_ids = ?invalid,
                "Malformed messages found during pre-validation"
            );
        }
    }

    /// Returns the outcome and whether the message was deleted from the DLQ.
    async fn process_message(
        &self,
        message: &DeadLetteredMessage,
        dry_run: bool,
    ) -> (ReprocessingOutcome, bool) {
        if message.receive_count > self.config.max_receive_count {
            tracing::info!(
                message_id = %message.id,
                receive_count = message.receive_count,
                "Skipping message over retry budget"
            );
            let detail = format!(
                "Receive count {} exceeds {}",
                message.receive_count, self.config.max_receive_count
            );
            return (
                ReprocessingOutcome::skipped(&message.id, REASON_RETRY_EXCEEDED, Some(detail)),
                false,
            );
        }

        if let Err(detail) = validate_envelope(&message.body) {
            tracing::info!(message_id = %message.id, error = %detail, "Skipping malformed message");
            return (
                ReprocessingOutcome::skipped(&message.id, REASON_INVALID_FORMAT, Some(detail)),
                false,
            );
        }

        if dry_run {
            return (ReprocessingOutcome::success(&message.id, REASON_DRY_RUN), false);
        }

        let attributes = self.provenance(message);
        let new_id = match self.primary.send(&message.body, &attributes).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "Failed to resubmit message");
                return (
                    ReprocessingOutcome::failed(&message.id, REASON_RESUBMIT_FAILED, Some(e.to_string())),
                    false,
                );
            }
        };

        if let Err(e) = self.dlq.delete(&message.receipt_handle).await {
            // Already resubmitted: the next drain will resubmit it again
            tracing::error!(
                message_id = %message.id,
                resubmitted_as = %new_id,
                error = %e,
                "Failed to delete resubmitted message from DLQ"
            );
            let detail = format!("Resubmitted as {} but DLQ delete failed: {}", new_id, e);
            return (
                ReprocessingOutcome::failed(&message.id, REASON_PROCESSING_ERROR, Some(detail)),
                false,
            );
        }

        tracing::debug!(message_id = %message.id, resubmitted_as = %new_id, "Message reprocessed");
        (ReprocessingOutcome::success(&message.id, REASON_REPROCESSED), true)
    }

    fn provenance(&self, message: &DeadLetteredMessage) -> MessageAttributes {
        let mut attributes = message.attributes.clone();
        attributes.insert("reprocessed".to_string(), "true".to_string());
        attributes.insert("originalMessageId".to_string(), message.id.clone());
        attributes.insert("reprocessedAt".to_string(), self.clock.now().to_rfc3339());
        attributes
    }

    async fn release_undeleted(&self, drained: &[DeadLetteredMessage], deleted: &HashSet<String>) {
        let mut released = 0usize;
        for message in drained.iter().filter(|m| !deleted.contains(&m.id)) {
            match self.dlq.release(&message.receipt_handle).await {
                Ok(()) => released += 1,
                Err(e) => {
                    tracing::warn!(message_id = %message.id, error = %e, "Failed to release message");
                }
            }
        }
        tracing::debug!(released, "Released undeleted messages");
    }

    async fn publish_metrics(&self, report: &ReprocessingReport) {
        let dry_run = report.dry_run.to_string();
        let data = [
            ("ReprocessedMessages", report.success_count),
            ("FailedMessages", report.failed_count),
            ("SkippedMessages", report.skipped_count),
        ]
        .into_iter()
        .map(|(name, count)| {
            MetricDatum::new(name, count as f64, MetricUnit::Count)
                .with_dimension("QueueName", self.dlq.queue_name())
                .with_dimension("DryRun", dry_run.clone())
                .at(report.finished_at)
        })
        .collect();

        if let Err(e) = self.metrics.publish(&self.config.namespace, data).await {
            tracing::warn!(error = %e, "Failed to publish reprocessing metrics");
        }
    }

    async fn persist(&self, report: &ReprocessingReport) {
        if self.stores.is_empty() {
            return;
        }
        let summary = render_summary(report);
        for store in &self.stores {
            if let Err(e) = store.save(report, &summary).await {
                tracing::error!(
                    store = store.name(),
                    report_id = %report.id,
                    error = %e,
                    "Failed to persist reprocessing report"
                );
            }
        }
    }
}
