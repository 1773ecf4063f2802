//! Alert delivery with pluggable channel support.
//!
//! An alert event is rendered once per metric and handed to every
//! configured [`AlertChannel`]. Built-in channels: Mattermost, Slack,
//! Telegram, generic webhook and SMTP email. Delivery is synchronous and
//! never retried in-process; by the time dispatch runs, the cooldown has
//! already been consumed, so a lost delivery costs one message, not a
//! duplicate storm.

pub mod channels;
pub mod dispatcher;
pub mod plugin;
pub mod template;


use async_trait::async_trait;
use dtk_alert::AlertData;

pub use dispatcher::{DeliveryReport, Dispatcher};
pub use plugin::{ChannelPlugin, ChannelRegistry};
pub use template::{render_message, DEFAULT_TEMPLATE_CONSECUTIVE, DEFAULT_TEMPLATE_SINGLE};

/// Errors from the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or invalid.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type is not registered.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// HTTP delivery failed.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// SMTP delivery failed.
    #[error("Notify: SMTP error: {0}")]
    Smtp(String),

    /// JSON handling failed (channel config parsing, payloads).
    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The external API answered with a non-success status.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, NotifyError>;

/// A delivery channel for alert events.
///
/// Implementations are created by the matching [`plugin::ChannelPlugin`]
/// from the channel's profile configuration. `message` is the rendered
/// template; `alert` carries the structured fields for channels that
/// build their own payloads.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, message: &str, alert: &AlertData) -> Result<()>;

    /// Channel type name (`"mattermost"`, `"email"`, ...).
    fn channel_type(&self) -> &str;

    /// Configured instance name (the key under `alert_channels`).
    fn name(&self) -> &str;
}

pub(crate) fn check_status(service: &str, status: reqwest::StatusCode, body: String) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(NotifyError::Api {
            service: service.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}
