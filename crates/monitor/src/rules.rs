//! DLQ alert rule evaluation.
//!
//! Pure functions over a [`QueueSnapshot`]: which rules are breached, how bad
//! each breach is, and what the queue's overall health is. The scheduled tick,
//! the on-demand health check and the dashboard all share these.

use courier_common::types::{
    Alert, AlertKind, AlertRule, AlertSeverity, HealthStatus, QueueSnapshot,
};

/// Severity of an accumulation breach by message count.
pub fn message_count_severity(count: u64) -> AlertSeverity {
    match count {
        c if c > 50 => AlertSeverity::Critical,
        c if c > 20 => AlertSeverity::High,
        c if c > 10 => AlertSeverity::Medium,
        _ => AlertSeverity::Low,
    }
}

/// Severity of a staleness breach, banded by hours since the oldest message.
pub fn staleness_severity(age_seconds: u64) -> AlertSeverity {
    let hours = age_seconds as f64 / 3600.0;
    if hours > 24.0 {
        AlertSeverity::Critical
    } else if hours > 12.0 {
        AlertSeverity::High
    } else if hours > 6.0 {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}

/// The snapshot value a rule of `kind` is compared against.
pub fn observed_value(kind: AlertKind, snapshot: &QueueSnapshot) -> f64 {
    match kind {
        AlertKind::Accumulation => snapshot.message_count as f64,
        AlertKind::Staleness => snapshot.oldest_message_age_seconds as f64,
        AlertKind::HighRate => snapshot.arrival_rate_per_window,
    }
}

/// Evaluate one rule. Breach when the observed value exceeds the threshold.
pub fn evaluate_rule(rule: &AlertRule, snapshot: &QueueSnapshot) -> Option<Alert> {
    let observed = observed_value(rule.kind, snapshot);
    if observed <= rule.threshold {
        return None;
    }

    let (severity, message) = match rule.kind {
        AlertKind::Accumulation => (
            message_count_severity(snapshot.message_count),
            format!(
                "DLQ {} holds {} messages (threshold {})",
                snapshot.queue_id, snapshot.message_count, rule.threshold
            ),
        ),
        AlertKind::Staleness => (
            staleness_severity(snapshot.oldest_message_age_seconds),
            format!(
                "Oldest message in DLQ {} is {:.1} hours old (threshold {:.1} hours)",
                snapshot.queue_id,
                snapshot.oldest_message_age_seconds as f64 / 3600.0,
                rule.threshold / 3600.0
            ),
        ),
        AlertKind::HighRate => (
            AlertSeverity::High,
            format!(
                "DLQ {} is receiving {:.1} messages per window (threshold {})",
                snapshot.queue_id, snapshot.arrival_rate_per_window, rule.threshold
            ),
        ),
    };

    Some(Alert {
        kind: rule.kind,
        severity,
        message,
        snapshot: snapshot.clone(),
        threshold: rule.threshold,
        observed_value: observed,
    })
}

/// Evaluate every rule, in rule order.
pub fn evaluate_rules(rules: &[AlertRule], snapshot: &QueueSnapshot) -> Vec<Alert> {
    rules
        .iter()
        .filter_map(|rule| evaluate_rule(rule, snapshot))
        .collect()
}

/// Reduce active alerts to a single health status.
pub fn health_from_alerts(alerts: &[Alert]) -> HealthStatus {
    if alerts.iter().any(|a| a.severity == AlertSeverity::Critical) {
        HealthStatus::Critical
    } else if alerts
        .iter()
        .any(|a| matches!(a.severity, AlertSeverity::High | AlertSeverity::Medium))
    {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Operator recommendations keyed by which alert kinds are active.
pub fn recommendations(alerts: &[Alert]) -> Vec<String> {
    let active = |kind: AlertKind| alerts.iter().any(|a| a.kind == kind);
    let mut out = Vec::new();

    if active(AlertKind::Accumulation) {
        out.push(
            "Messages are accumulating: inspect recent failures and run a dry-run reprocess"
                .to_string(),
        );
    }
    if active(AlertKind::Staleness) {
        out.push(
            "Old messages are waiting: reprocess or archive them before they expire".to_string(),
        );
    }
    if active(AlertKind::HighRate) {
        out.push(
            "Failure rate is elevated: check the primary consumer and downstream providers"
                .to_string(),
        );
    }
    if out.is_empty() {
        out.push("No action needed".to_string());
    }
    out
}
