//! Anomaly detection: preprocessing, windowed statistical detectors and
//! seasonality-adaptive confidence intervals.
//!
//! The four detector variants share the interface in [`Detector`], a
//! tagged variant rather than a trait-object hierarchy: the set is closed
//! and the statistical three share most of their machinery. A detector is
//! a pure function from a preprocessed window to per-position verdicts;
//! all I/O lives in the pipeline crate.

pub mod detectors;
pub mod preprocess;
pub mod seasonality;
pub mod stats;


use dtk_common::{Direction, SeasonalityData};

pub use detectors::{Detector, IqrDetector, MadDetector, ManualBoundsDetector, ZScoreDetector};
pub use preprocess::{InputType, Preprocessing};
pub use seasonality::SeasonalityComponent;

/// Scale floor guarding division by zero on constant windows.
pub const EPSILON: f64 = 1e-10;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("Detect: unknown detector type '{0}'")]
    UnknownType(String),

    #[error("Detect: invalid detector configuration: {0}")]
    InvalidParams(String),

    #[error("Detect: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DetectError>;

/// Why a position was emitted as non-anomalous without being judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than `min_samples` finite values in the trailing window.
    InsufficientData,
    /// The position itself has no value.
    MissingData,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InsufficientData => "insufficient_data",
            SkipReason::MissingData => "missing_data",
        }
    }
}

/// Per-position verdict. `index` refers into the window the detector was
/// given; the caller maps indices back onto grid timestamps.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub index: usize,
    pub value: Option<f64>,
    pub is_anomaly: bool,
    pub confidence_lower: Option<f64>,
    pub confidence_upper: Option<f64>,
    pub direction: Direction,
    pub severity: f64,
    pub metadata: serde_json::Value,
    pub reason: Option<SkipReason>,
}

impl DetectionResult {
    fn skipped(index: usize, value: Option<f64>, reason: SkipReason) -> Self {
        Self {
            index,
            value,
            is_anomaly: false,
            confidence_lower: None,
            confidence_upper: None,
            direction: Direction::None,
            severity: 0.0,
            metadata: serde_json::json!({ "reason": reason.as_str() }),
            reason: Some(reason),
        }
    }
}

/// Input slice a detector judges: preprocessed values plus the seasonality
/// blob of each position.
#[derive(Debug, Clone, Copy)]
pub struct WindowInput<'a> {
    pub values: &'a [Option<f64>],
    pub seasonality: &'a [SeasonalityData],
}
