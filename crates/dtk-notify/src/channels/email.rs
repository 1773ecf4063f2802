use async_trait::async_trait;
use dtk_alert::AlertData;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::Value;

use crate::plugin::ChannelPlugin;
use crate::{AlertChannel, NotifyError, Result};

pub struct EmailChannel {
    name: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    recipients: Vec<String>,
}

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    #[serde(default = "default_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
    recipients: Vec<String>,
}

fn default_port() -> u16 {
    587
}

impl EmailChannel {
    fn from_config(name: &str, cfg: EmailConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?
            .port(cfg.smtp_port);
        if let (Some(user), Some(pass)) = (&cfg.smtp_username, &cfg.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            name: name.to_string(),
            transport: builder.build(),
            from: cfg.from,
            recipients: cfg.recipients,
        })
    }

    fn subject(alert: &AlertData) -> String {
        if alert.is_no_data {
            format!("[dtk] No data: {}", alert.metric_name)
        } else {
            format!(
                "[dtk] Anomaly in {} ({})",
                alert.metric_name, alert.direction
            )
        }
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    async fn send(&self, message: &str, alert: &AlertData) -> Result<()> {
        let subject = Self::subject(alert);
        for recipient in &self.recipients {
            let email = Message::builder()
                .from(
                    self.from
                        .parse()
                        .map_err(|e| NotifyError::InvalidConfig(format!("email from: {e}")))?,
                )
                .to(recipient
                    .parse()
                    .map_err(|e| NotifyError::InvalidConfig(format!("email to: {e}")))?)
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(message.to_string())
                .map_err(|e| NotifyError::Smtp(e.to_string()))?;

            self.transport
                .send(email)
                .await
                .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        }
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "email"
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        if cfg.recipients.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "email: at least one recipient is required".into(),
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
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        Ok(Box::new(EmailChannel::from_config(instance_name, cfg)?))
    }
}
