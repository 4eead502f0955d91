//! Outbound webhook sink
//!
//! Posts `{alert_type, sequence, raw, text}` to the configured URL.
//! Failures leave the alert unprocessed for the retry worker, so the
//! sink never retries on its own.

use async_trait::async_trait;
use beacon_model::{AdapterError, AlertNotification, WebhookSink};
use std::time::Duration;
use tracing::debug;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpWebhook {
    client: reqwest::Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: String) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| AdapterError::WebhookUnavailable(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn notify(&self, notification: &AlertNotification) -> Result<(), AdapterError> {
        debug!(sequence = notification.sequence, "posting alert to webhook");
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| AdapterError::WebhookUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::WebhookUnexpectedStatus(status.as_u16()));
        }
        Ok(())
    }
}

/// Used when no webhook URL is configured: informational alerts are only
/// logged.
pub struct LogOnlyWebhook;

#[async_trait]
impl WebhookSink for LogOnlyWebhook {
    async fn notify(&self, notification: &AlertNotification) -> Result<(), AdapterError> {
        tracing::info!(
            sequence = notification.sequence,
            text = %notification.text,
            "informational alert"
        );
        Ok(())
    }
}
