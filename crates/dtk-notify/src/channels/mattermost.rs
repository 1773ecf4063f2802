use async_trait::async_trait;
use dtk_alert::AlertData;
use serde::Deserialize;
use serde_json::Value;

use super::http_client;
use crate::plugin::ChannelPlugin;
use crate::{check_status, AlertChannel, NotifyError, Result};

pub struct MattermostChannel {
    name: String,
    client: reqwest::Client,
    webhook_url: String,
    username: String,
    icon_emoji: String,
}

#[derive(Deserialize)]
struct MattermostConfig {
    webhook_url: String,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default = "default_icon")]
    icon_emoji: String,
    timeout_secs: Option<u64>,
}

fn default_username() -> String {
    "dtk".to_string()
}

fn default_icon() -> String {
    ":warning:".to_string()
}

impl MattermostChannel {
    fn from_config(name: &str, cfg: MattermostConfig) -> Result<Self> {
        if cfg.webhook_url.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "mattermost: webhook_url is required".into(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            client: http_client(cfg.timeout_secs),
            webhook_url: cfg.webhook_url,
            username: cfg.username,
            icon_emoji: cfg.icon_emoji,
        })
    }
}

#[async_trait]
impl AlertChannel for MattermostChannel {
    async fn send(&self, message: &str, _alert: &AlertData) -> Result<()> {
        let payload = serde_json::json!({
            "text": message,
            "username": self.username,
            "icon_emoji": self.icon_emoji,
        });
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        check_status("mattermost", status, body)
    }

    fn channel_type(&self) -> &str {
        "mattermost"
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct MattermostPlugin;

impl ChannelPlugin for MattermostPlugin {
    fn name(&self) -> &str {
        "mattermost"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<MattermostConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("mattermost: {e}")))?;
        Ok(())
    }

    fn create_channel(
        &self,
        instance_name: &str,
        config: &Value,
    ) -> Result<Box<dyn AlertChannel>> {
        let cfg: MattermostConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("mattermost: {e}")))?;
        Ok(Box::new(MattermostChannel::from_config(instance_name, cfg)?))
    }
}
