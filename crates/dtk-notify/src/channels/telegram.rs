use async_trait::async_trait;
use dtk_alert::AlertData;
use serde::Deserialize;
use serde_json::Value;

use super::http_client;
use crate::plugin::ChannelPlugin;
use crate::{check_status, AlertChannel, NotifyError, Result};

pub struct TelegramChannel {
    name: String,
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

#[derive(Deserialize)]
struct TelegramConfig {
    bot_token: String,
    chat_id: String,
    timeout_secs: Option<u64>,
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    async fn send(&self, message: &str, _alert: &AlertData) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": message,
            "parse_mode": "Markdown",
        });
        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        check_status("telegram", status, body)
    }

    fn channel_type(&self) -> &str {
        "telegram"
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct TelegramPlugin;

impl ChannelPlugin for TelegramPlugin {
    fn name(&self) -> &str {
        "telegram"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: TelegramConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("telegram: {e}")))?;
        if cfg.bot_token.is_empty() || cfg.chat_id.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "telegram: bot_token and chat_id are required".into(),
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
        let cfg: TelegramConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("telegram: {e}")))?;
        Ok(Box::new(TelegramChannel {
            name: instance_name.to_string(),
            client: http_client(cfg.timeout_secs),
            bot_token: cfg.bot_token,
            chat_id: cfg.chat_id,
        }))
    }
}
