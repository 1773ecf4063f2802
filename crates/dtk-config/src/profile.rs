use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::env::interpolate;
use crate::{ConfigError, Result};

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 3600;

/// One database connection profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    #[serde(rename = "type")]
    pub db_type: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// SQLite database file.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub internal_database: Option<String>,
    #[serde(default)]
    pub internal_schema: Option<String>,
    #[serde(default)]
    pub data_database: Option<String>,
    #[serde(default)]
    pub data_schema: Option<String>,
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: u64,
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

impl ProfileConfig {
    pub fn validate(&self) -> Result<()> {
        match self.db_type.as_str() {
            "sqlite" => {
                if self.path.is_none() {
                    return Err(ConfigError::Invalid(
                        "sqlite profile requires 'path'".into(),
                    ));
                }
            }
            "clickhouse" | "postgres" => {
                if self.host.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "{} profile requires 'host'",
                        self.db_type
                    )));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Invalid database type '{other}' (expected sqlite, clickhouse or postgres)"
                )))
            }
        }
        if let Some(port) = self.port {
            if port == 0 || port > 65535 {
                return Err(ConfigError::Invalid(format!(
                    "Port must be between 1 and 65535, got {port}"
                )));
            }
        }
        Ok(())
    }

    /// Namespace for the `_dtk_*` tables.
    pub fn internal_location(&self) -> Result<Option<String>> {
        match self.db_type.as_str() {
            "sqlite" => Ok(None),
            "clickhouse" => self
                .internal_database
                .clone()
                .map(Some)
                .ok_or_else(|| ConfigError::Invalid("internal_database must be set".into())),
            _ => self
                .internal_schema
                .clone()
                .map(Some)
                .ok_or_else(|| ConfigError::Invalid("internal_schema must be set".into())),
        }
    }

    /// Namespace the user queries run against.
    pub fn data_location(&self) -> Result<Option<String>> {
        match self.db_type.as_str() {
            "sqlite" => Ok(None),
            "clickhouse" => self
                .data_database
                .clone()
                .map(Some)
                .ok_or_else(|| ConfigError::Invalid("data_database must be set".into())),
            _ => self
                .data_schema
                .clone()
                .map(Some)
                .ok_or_else(|| ConfigError::Invalid("data_schema must be set".into())),
        }
    }
}

/// Declared alert channel: a type plus type-specific configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelDecl {
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(flatten)]
    pub config: serde_json::Value,
}

/// The project's `profiles.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilesConfig {
    pub profiles: HashMap<String, ProfileConfig>,
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub alert_channels: HashMap<String, ChannelDecl>,
}

impl ProfilesConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if content.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Profiles file is empty: {}",
                path.display()
            )));
        }
        let interpolated = interpolate(&content);
        let config: ProfilesConfig =
            serde_yaml::from_str(&interpolated).map_err(|source| ConfigError::Yaml {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, profile) in &self.profiles {
            profile
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("profile '{name}': {e}")))?;
        }
        if let Some(default) = &self.default_profile {
            if !self.profiles.contains_key(default) {
                return Err(ConfigError::Invalid(format!(
                    "default_profile '{default}' not found in profiles"
                )));
            }
        }
        Ok(())
    }

    /// Resolve a profile by name, falling back to the default.
    pub fn profile(&self, name: Option<&str>) -> Result<&ProfileConfig> {
        let name = match name {
            Some(n) => n,
            None => self.default_profile.as_deref().ok_or_else(|| {
                ConfigError::Invalid("No profile name specified and no default_profile set".into())
            })?,
        };
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::Invalid(format!("Profile '{name}' not found")))
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelDecl> {
        self.alert_channels
            .get(name)
            .ok_or_else(|| ConfigError::Invalid(format!("Alert channel '{name}' not found")))
    }
}
