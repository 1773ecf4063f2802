use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use dtk_alert::AlertDirection;
use dtk_common::Interval;
use dtk_detect::Detector;
use serde::Deserialize;

use crate::{ConfigError, Result};

const MAX_LOADING_BATCH_SIZE: u64 = 1_000_000;

/// Seasonality extractors the loader can compute from a timestamp.
pub const TIMESTAMP_EXTRACTORS: &[&str] = &[
    "hour",
    "day",
    "dow",
    "day_of_week",
    "month",
    "quarter",
    "year",
    "is_weekend",
];

/// One declared metric (`metrics/<name>.yml`).
#[derive(Debug, Clone, Deserialize)]
pub struct MetricConfig {
    pub name: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub interval: Interval,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_file: Option<PathBuf>,
    #[serde(default)]
    pub query_columns: QueryColumns,
    #[serde(default)]
    pub loading_start_time: Option<String>,
    #[serde(default = "default_loading_batch_size")]
    pub loading_batch_size: u64,
    #[serde(default)]
    pub seasonality_columns: Vec<SeasonalityColumn>,
    #[serde(default)]
    pub detectors: Vec<DetectorConfig>,
    #[serde(default)]
    pub alerting: Option<AlertingConfig>,
    #[serde(default)]
    pub tables: Option<TablesConfig>,
}

/// Mapping from user query output columns to engine fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryColumns {
    pub timestamp: String,
    pub metric: String,
    pub seasonality: Vec<String>,
}

impl Default for QueryColumns {
    fn default() -> Self {
        Self {
            timestamp: "timestamp".to_string(),
            metric: "value".to_string(),
            seasonality: Vec::new(),
        }
    }
}

/// One seasonality column: either computed from the timestamp (`extract`)
/// or taken from the query output. The string shorthand `- hour` means
/// name and extractor coincide.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SeasonalityColumn {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        extract: Option<String>,
    },
}

impl SeasonalityColumn {
    pub fn name(&self) -> &str {
        match self {
            SeasonalityColumn::Name(n) => n,
            SeasonalityColumn::Full { name, .. } => name,
        }
    }

    pub fn extractor(&self) -> Option<&str> {
        match self {
            SeasonalityColumn::Name(n) => Some(n.as_str()),
            SeasonalityColumn::Full { extract, name } => {
                extract.as_deref().or(Some(name.as_str()))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(rename = "type")]
    pub detector_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub enabled: bool,
    pub timezone: String,
    pub channels: Vec<String>,
    pub min_detectors: u32,
    pub direction: AlertDirection,
    pub consecutive_anomalies: u32,
    pub alert_cooldown: Option<Interval>,
    pub cooldown_reset_on_recovery: bool,
    pub no_data_alert: bool,
    pub template_single: Option<String>,
    pub template_consecutive: Option<String>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: "UTC".to_string(),
            channels: Vec::new(),
            min_detectors: 1,
            direction: AlertDirection::Same,
            consecutive_anomalies: 3,
            alert_cooldown: None,
            cooldown_reset_on_recovery: false,
            no_data_alert: false,
            template_single: None,
            template_consecutive: None,
        }
    }
}

/// Per-metric internal table overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TablesConfig {
    #[serde(default)]
    pub datapoints: Option<String>,
    #[serde(default)]
    pub detections: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_loading_batch_size() -> u64 {
    10_000
}

impl MetricConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if content.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "Empty metric config: {}",
                path.display()
            )));
        }
        let config: MetricConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("metric name cannot be empty".into()));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::Invalid(format!(
                "metric name '{}' must be alphanumeric with '_' or '-'",
                self.name
            )));
        }
        match (&self.query, &self.query_file) {
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "Either 'query' or 'query_file' must be specified".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "Only one of 'query' and 'query_file' may be specified".into(),
                ))
            }
            _ => {}
        }
        if self.loading_batch_size < 1 {
            return Err(ConfigError::Invalid(
                "loading_batch_size must be at least 1".into(),
            ));
        }
        if self.loading_batch_size > MAX_LOADING_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "loading_batch_size too large (max {MAX_LOADING_BATCH_SIZE})"
            )));
        }
        if let Some(raw) = &self.loading_start_time {
            self.parse_start_time_str(raw)?;
        }

        let mut seen = std::collections::HashSet::new();
        for column in &self.seasonality_columns {
            if !seen.insert(column.name().to_string()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate seasonality column '{}'",
                    column.name()
                )));
            }
            let from_query = self
                .query_columns
                .seasonality
                .iter()
                .any(|c| c == column.name());
            let known_extractor = column
                .extractor()
                .is_some_and(|e| TIMESTAMP_EXTRACTORS.contains(&e));
            if !from_query && !known_extractor {
                return Err(ConfigError::Invalid(format!(
                    "Invalid seasonality column '{}': not a timestamp extractor ({}) \
                     and not listed under query_columns.seasonality",
                    column.name(),
                    TIMESTAMP_EXTRACTORS.join(", ")
                )));
            }
        }

        // Detector params fail fast at config load, before any locking.
        for detector in &self.detectors {
            Detector::build(&detector.detector_type, &detector.params)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        if let Some(alerting) = &self.alerting {
            if alerting.consecutive_anomalies < 1 {
                return Err(ConfigError::Invalid(
                    "consecutive_anomalies must be at least 1".into(),
                ));
            }
            if alerting.min_detectors < 1 {
                return Err(ConfigError::Invalid(
                    "min_detectors must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }

    /// The SQL text, inline or read from `query_file` relative to the
    /// project directory.
    pub fn query_text(&self, project_dir: &Path) -> Result<String> {
        if let Some(query) = &self.query {
            return Ok(query.clone());
        }
        let file = self.query_file.as_ref().expect("validated");
        let path = if file.is_absolute() {
            file.clone()
        } else {
            project_dir.join(file)
        };
        std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn loading_start(&self) -> Result<Option<NaiveDateTime>> {
        self.loading_start_time
            .as_deref()
            .map(|raw| self.parse_start_time_str(raw))
            .transpose()
    }

    fn parse_start_time_str(&self, raw: &str) -> Result<NaiveDateTime> {
        for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
                return Ok(dt);
            }
        }
        if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
        Err(ConfigError::Invalid(format!(
            "invalid loading_start_time '{raw}' (expected 'YYYY-MM-DD[ HH:MM:SS]')"
        )))
    }

    /// Detectors built and validated from their declared configs.
    pub fn build_detectors(&self) -> Result<Vec<Detector>> {
        self.detectors
            .iter()
            .map(|d| {
                Detector::build(&d.detector_type, &d.params)
                    .map_err(|e| ConfigError::Invalid(e.to_string()))
            })
            .collect()
    }
}
