//! Alert channel implementations.
//!
//! - [`WebhookAlertChannel`] posts each alert as JSON to an operator webhook
//! - [`LogAlertChannel`] only logs, for deployments without a webhook

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use courier_common::config::AppConfig;
use courier_common::error::ProviderError;
use courier_common::providers::AlertChannel;

/// Default request timeout for webhook delivery.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts `{"subject", "payload", "sent_at"}` to a webhook URL.
pub struct WebhookAlertChannel {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlertChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::AlertChannel(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookAlertChannel {
    async fn notify(&self, subject: &str, payload: &serde_json::Value) -> Result<(), ProviderError> {
        let body = json!({
            "subject": subject,
            "payload": payload,
            "sent_at": Utc::now(),
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::AlertChannel(format!("Webhook request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::AlertChannel(format!(
                "Webhook returned {}: {}",
                status.as_u16(),
                text
            )));
        }

        tracing::debug!(subject, status = status.as_u16(), "Alert delivered to webhook");
        Ok(())
    }
}

/// Logs each alert at warn level.
#[derive(Debug, Default)]
pub struct LogAlertChannel;

#[async_trait]
impl AlertChannel for LogAlertChannel {
    async fn notify(&self, subject: &str, payload: &serde_json::Value) -> Result<(), ProviderError> {
        tracing::warn!(subject, payload = %payload, "Alert");
        Ok(())
    }
}

/// Webhook channel when `ALERT_WEBHOOK_URL` is set, log-only otherwise.
pub fn alert_channel_from_config(config: &AppConfig) -> anyhow::Result<Arc<dyn AlertChannel>> {
    match &config.alert_webhook_url {
        Some(url) => {
            tracing::info!("Alerts will be posted to the configured webhook");
            Ok(Arc::new(WebhookAlertChannel::new(url.clone(), WEBHOOK_TIMEOUT)?))
        }
        None => {
            tracing::info!("ALERT_WEBHOOK_URL not set, alerts will only be logged");
            Ok(Arc::new(LogAlertChannel))
        }
    }
}
