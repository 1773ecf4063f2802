use std::collections::HashMap;

use serde_json::Value;

use crate::{AlertChannel, NotifyError, Result};

/// Factory for one channel type.
pub trait ChannelPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn validate_config(&self, config: &Value) -> Result<()>;
    fn create_channel(&self, instance_name: &str, config: &Value)
        -> Result<Box<dyn AlertChannel>>;
}

/// Registry of channel plugins, keyed by type name.
pub struct ChannelRegistry {
    plugins: HashMap<String, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn create_channel(
        &self,
        type_name: &str,
        instance_name: &str,
        config: &Value,
    ) -> Result<Box<dyn AlertChannel>> {
        let plugin = self
            .plugins
            .get(type_name)
            .ok_or_else(|| NotifyError::UnknownChannelType(type_name.to_string()))?;
        plugin.validate_config(config)?;
        plugin.create_channel(instance_name, config)
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::mattermost::MattermostPlugin));
        registry.register(Box::new(crate::channels::slack::SlackPlugin));
        registry.register(Box::new(crate::channels::telegram::TelegramPlugin));
        registry.register(Box::new(crate::channels::webhook::WebhookPlugin));
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry
    }
}
