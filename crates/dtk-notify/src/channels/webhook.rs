use async_trait::async_trait;
use dtk_alert::AlertData;
use serde::Deserialize;
use serde_json::Value;

use super::http_client;
use crate::plugin::ChannelPlugin;
use crate::{check_status, AlertChannel, NotifyError, Result};

/// Generic webhook: posts the alert event as a JSON document.
pub struct WebhookChannel {
    name: String,
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct WebhookConfig {
    url: String,
    timeout_secs: Option<u64>,
}

fn event_payload(message: &str, alert: &AlertData) -> Value {
    serde_json::json!({
        "metric_name": alert.metric_name,
        "timestamp": alert.local_time,
        "timezone": alert.timezone,
        "value": alert.value,
        "confidence_lower": alert.confidence_lower,
        "confidence_upper": alert.confidence_upper,
        "direction": alert.direction.to_string(),
        "severity": alert.severity,
        "detector_name": alert.detector_name,
        "consecutive_count": alert.consecutive_count,
        "no_data": alert.is_no_data,
        "message": message,
    })
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    async fn send(&self, message: &str, alert: &AlertData) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&event_payload(message, alert))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        check_status("webhook", status, body)
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        if cfg.url.is_empty() {
            return Err(NotifyError::InvalidConfig("webhook: url is required".into()));
        }
        Ok(())
    }

    fn create_channel(
        &self,
        instance_name: &str,
        config: &Value,
    ) -> Result<Box<dyn AlertChannel>> {
        self.validate_config(config)?;
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        Ok(Box::new(WebhookChannel {
            name: instance_name.to_string(),
            client: http_client(cfg.timeout_secs),
            url: cfg.url,
        }))
    }
}
