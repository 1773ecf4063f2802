use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Seasonality column values captured alongside a datapoint.
///
/// Keys are column names (`hour`, `dow`, or a user query column); values
/// are integers, strings or booleans. Serialized as a JSON object at the
/// store boundary. A `BTreeMap` keeps the serialized form stable.
pub type SeasonalityData = BTreeMap<String, serde_json::Value>;

/// One point of a metric series on the interval grid.
///
/// `value` is absent for gap-filled positions.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
    pub seasonality: SeasonalityData,
}

/// Which side of the confidence interval a value fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
    #[default]
    None,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Above => write!(f, "above"),
            Direction::Below => write!(f, "below"),
            Direction::None => write!(f, "none"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" | "up" => Ok(Direction::Above),
            "below" | "down" => Ok(Direction::Below),
            "none" => Ok(Direction::None),
            _ => Err(format!("unknown direction: {s}")),
        }
    }
}

/// Lifecycle state of a metric's task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Idle => write!(f, "idle"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TaskStatus::Idle),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("unknown task status: {s}")),
        }
    }
}

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStep {
    Load,
    Detect,
    Alert,
}

impl PipelineStep {
    pub const ALL: [PipelineStep; 3] = [PipelineStep::Load, PipelineStep::Detect, PipelineStep::Alert];
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStep::Load => write!(f, "load"),
            PipelineStep::Detect => write!(f, "detect"),
            PipelineStep::Alert => write!(f, "alert"),
        }
    }
}

impl std::str::FromStr for PipelineStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "load" => Ok(PipelineStep::Load),
            "detect" => Ok(PipelineStep::Detect),
            "alert" => Ok(PipelineStep::Alert),
            _ => Err(format!("unknown pipeline step: {s}")),
        }
    }
}
