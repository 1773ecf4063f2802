//! Declarative configuration: metric files, profiles and alert channels.
//!
//! Configuration failures are fail-fast: nothing here touches the
//! database, and the CLI maps [`ConfigError`] to exit code 2.

pub mod env;
pub mod metric;
pub mod profile;
pub mod project;


pub use metric::{
    AlertingConfig, DetectorConfig, MetricConfig, QueryColumns, SeasonalityColumn, TablesConfig,
};
pub use profile::{ChannelDecl, ProfileConfig, ProfilesConfig};
pub use project::{discover_metric_files, load_project_metrics};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config: {0}")]
    Invalid(String),

    #[error("Config: failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Config: YAML error in '{path}': {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Config: duplicate metric name '{name}' found in '{first}' and '{second}'")]
    DuplicateMetric {
        name: String,
        first: String,
        second: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
