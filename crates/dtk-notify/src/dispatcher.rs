use dtk_alert::AlertData;

use crate::template::{render_message, select_template};
use crate::AlertChannel;

/// Outcome of one channel delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub channel: String,
    pub channel_type: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Renders an alert event and delivers it to every configured channel.
///
/// Failures are logged and reported but never retried; the cooldown was
/// already advanced when the event was recorded.
pub struct Dispatcher {
    channels: Vec<Box<dyn AlertChannel>>,
    template_single: Option<String>,
    template_consecutive: Option<String>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn AlertChannel>>) -> Self {
        Self {
            channels,
            template_single: None,
            template_consecutive: None,
        }
    }

    pub fn with_templates(
        mut self,
        single: Option<String>,
        consecutive: Option<String>,
    ) -> Self {
        self.template_single = single;
        self.template_consecutive = consecutive;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub async fn dispatch(&self, alert: &AlertData) -> Vec<DeliveryReport> {
        let template = select_template(
            alert,
            self.template_single.as_deref(),
            self.template_consecutive.as_deref(),
        );
        let message = render_message(template, alert);

        let mut reports = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            match channel.send(&message, alert).await {
                Ok(()) => {
                    tracing::info!(
                        channel = channel.name(),
                        channel_type = channel.channel_type(),
                        metric = %alert.metric_name,
                        "Alert delivered"
                    );
                    reports.push(DeliveryReport {
                        channel: channel.name().to_string(),
                        channel_type: channel.channel_type().to_string(),
                        ok: true,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        channel = channel.name(),
                        channel_type = channel.channel_type(),
                        metric = %alert.metric_name,
                        error = %e,
                        "Alert delivery failed"
                    );
                    reports.push(DeliveryReport {
                        channel: channel.name().to_string(),
                        channel_type: channel.channel_type().to_string(),
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        reports
    }
}
