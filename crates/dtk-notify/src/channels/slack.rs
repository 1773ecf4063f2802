use async_trait::async_trait;
use dtk_alert::AlertData;
use serde::Deserialize;
use serde_json::Value;

use super::http_client;
use crate::plugin::ChannelPlugin;
use crate::{check_status, AlertChannel, NotifyError, Result};

pub struct SlackChannel {
    name: String,
    client: reqwest::Client,
    webhook_url: String,
}

#[derive(Deserialize)]
struct SlackConfig {
    webhook_url: String,
    timeout_secs: Option<u64>,
}

#[async_trait]
impl AlertChannel for SlackChannel {
    async fn send(&self, message: &str, _alert: &AlertData) -> Result<()> {
        let payload = serde_json::json!({ "text": message });
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        check_status("slack", status, body)
    }

    fn channel_type(&self) -> &str {
        "slack"
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct SlackPlugin;

impl ChannelPlugin for SlackPlugin {
    fn name(&self) -> &str {
        "slack"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: SlackConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("slack: {e}")))?;
        if cfg.webhook_url.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "slack: webhook_url is required".into(),
            ));
        }
        Ok(())
    }

    fn create_channel(
        &self,
        instance_name: &str,
        config: &Value,
    ) -> Result<Box<dyn AlertChannel>> {
        self.validate_config(config)?;
        let cfg: SlackConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("slack: {e}")))?;
        Ok(Box::new(SlackChannel {
            name: instance_name.to_string(),
            client: http_client(cfg.timeout_secs),
            webhook_url: cfg.webhook_url,
        }))
    }
}
