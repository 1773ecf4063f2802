pub mod iqr;
pub mod mad;
pub mod manual_bounds;
pub mod zscore;

pub use iqr::IqrDetector;
pub use mad::MadDetector;
pub use manual_bounds::ManualBoundsDetector;
pub use zscore::ZScoreDetector;

use dtk_common::Direction;
use serde_json::{json, Map, Value};

use crate::preprocess::Preprocessing;
use crate::seasonality::{self, SeasonalityComponent};
use crate::stats;
use crate::{DetectError, DetectionResult, Result, SkipReason, WindowInput, EPSILON};

/// Statistic family shared by the three windowed detectors.
///
/// Each family reduces a weighted sample to a `(center, scale)` pair; the
/// seasonality adjuster reuses the same reduction per group so multipliers
/// compare like with like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatFamily {
    Mad,
    ZScore,
    Iqr,
}

impl StatFamily {
    pub fn center_scale(&self, values: &[f64], weights: &[f64]) -> (f64, f64) {
        match self {
            StatFamily::Mad => {
                let center = stats::weighted_median(values, weights);
                let scale = stats::weighted_mad(values, weights, center);
                (center, scale)
            }
            StatFamily::ZScore => {
                let center = stats::weighted_mean(values, weights);
                let scale = stats::weighted_stddev(values, weights, center);
                (center, scale)
            }
            StatFamily::Iqr => {
                let q1 = stats::weighted_percentile(values, weights, 25.0);
                let q3 = stats::weighted_percentile(values, weights, 75.0);
                ((q1 + q3) / 2.0, q3 - q1)
            }
        }
    }

    /// Half-width of the confidence band in units of scale.
    ///
    /// For IQR the center is the midhinge, so `q1 - t*iqr` is
    /// `center - (0.5 + t)*iqr`.
    fn band_width(&self, threshold: f64) -> f64 {
        match self {
            StatFamily::Iqr => 0.5 + threshold,
            _ => threshold,
        }
    }

    fn labels(&self) -> (&'static str, &'static str) {
        match self {
            StatFamily::Mad => ("median", "mad"),
            StatFamily::ZScore => ("mean", "std"),
            StatFamily::Iqr => ("midhinge", "iqr"),
        }
    }

    fn severity(&self, value: f64, center: f64, scale: f64, lower: f64, upper: f64) -> f64 {
        match self {
            StatFamily::Iqr => {
                if value > upper {
                    (value - upper) / scale
                } else if value < lower {
                    (lower - value) / scale
                } else {
                    0.0
                }
            }
            _ => (value - center).abs() / scale,
        }
    }
}

/// Parameters shared by the three statistical detectors.
pub(crate) struct StatSpec<'a> {
    pub threshold: f64,
    pub window_size: usize,
    pub min_samples: usize,
    pub preprocessing: &'a Preprocessing,
    pub seasonality_components: &'a [SeasonalityComponent],
    pub min_samples_per_group: usize,
}

pub(crate) fn validate_stat_params(
    threshold: f64,
    window_size: usize,
    min_samples: usize,
    min_samples_floor: usize,
    preprocessing: &Preprocessing,
) -> Result<()> {
    if threshold <= 0.0 {
        return Err(DetectError::InvalidParams("threshold must be positive".into()));
    }
    if window_size < 1 {
        return Err(DetectError::InvalidParams(
            "window_size must be at least 1".into(),
        ));
    }
    if min_samples < min_samples_floor {
        return Err(DetectError::InvalidParams(format!(
            "min_samples must be at least {min_samples_floor}"
        )));
    }
    if min_samples > window_size {
        return Err(DetectError::InvalidParams(
            "min_samples cannot exceed window_size".into(),
        ));
    }
    preprocessing.validate()
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Windowed detection shared by MAD, Z-Score and IQR.
///
/// The judgment window at position `i` is the trailing `window_size`
/// positions strictly before `i`; the current value never influences its
/// own confidence interval.
pub(crate) fn run_statistical(
    family: StatFamily,
    spec: &StatSpec<'_>,
    input: WindowInput<'_>,
    start_index: usize,
) -> Vec<DetectionResult> {
    let (center_label, scale_label) = family.labels();
    let mut results = Vec::with_capacity(input.values.len().saturating_sub(start_index));

    for i in start_index..input.values.len() {
        let value = input.values[i];
        let Some(v) = finite(value) else {
            results.push(DetectionResult::skipped(i, None, SkipReason::MissingData));
            continue;
        };

        let window_start = i.saturating_sub(spec.window_size);
        let mut positions = Vec::new();
        let mut sample_values = Vec::new();
        for (offset, candidate) in input.values[window_start..i].iter().enumerate() {
            if let Some(x) = finite(*candidate) {
                positions.push(window_start + offset);
                sample_values.push(x);
            }
        }

        if sample_values.len() < spec.min_samples {
            results.push(DetectionResult::skipped(
                i,
                Some(v),
                SkipReason::InsufficientData,
            ));
            continue;
        }

        let weights = stats::recent_weights(sample_values.len(), spec.preprocessing.recent_weight);
        let (global_center, raw_scale) = family.center_scale(&sample_values, &weights);
        let global_scale = raw_scale.max(EPSILON);

        let mut metadata = Map::new();
        metadata.insert(format!("global_{center_label}"), json!(global_center));
        metadata.insert(format!("global_{scale_label}"), json!(global_scale));
        metadata.insert("window_size".into(), json!(sample_values.len()));

        let (center, scale) = if spec.seasonality_components.is_empty() {
            (global_center, global_scale)
        } else {
            let samples: Vec<(usize, f64, f64)> = positions
                .iter()
                .zip(&sample_values)
                .zip(&weights)
                .map(|((&idx, &val), &w)| (idx, val, w))
                .collect();
            let adjustment = seasonality::adjust(
                family,
                global_center,
                global_scale,
                spec.seasonality_components,
                &samples,
                input.seasonality,
                &input.seasonality[i],
                spec.min_samples_per_group,
            );
            metadata.insert("seasonality_groups".into(), Value::Array(adjustment.groups));
            (adjustment.center, adjustment.scale)
        };

        metadata.insert(format!("adjusted_{center_label}"), json!(center));
        metadata.insert(format!("adjusted_{scale_label}"), json!(scale));

        let band = family.band_width(spec.threshold) * scale;
        let lower = center - band;
        let upper = center + band;

        let direction = if v > upper {
            Direction::Above
        } else if v < lower {
            Direction::Below
        } else {
            Direction::None
        };
        let severity = family.severity(v, center, scale, lower, upper);
        metadata.insert("severity".into(), json!(severity));
        if direction != Direction::None {
            metadata.insert("direction".into(), json!(direction.to_string()));
        }
        if !spec.preprocessing.is_default() {
            let mut pre = Map::new();
            spec.preprocessing.non_default_params(&mut pre);
            metadata.insert("preprocessing".into(), Value::Object(pre));
        }

        results.push(DetectionResult {
            index: i,
            value: Some(v),
            is_anomaly: direction != Direction::None,
            confidence_lower: Some(lower),
            confidence_upper: Some(upper),
            direction,
            severity,
            metadata: Value::Object(metadata),
            reason: None,
        });
    }

    results
}

/// The four detector variants behind one `detect` capability.
#[derive(Debug, Clone)]
pub enum Detector {
    Mad(MadDetector),
    ZScore(ZScoreDetector),
    Iqr(IqrDetector),
    ManualBounds(ManualBoundsDetector),
}

impl Detector {
    /// Build and validate a detector from its declared type and params.
    pub fn build(kind: &str, params: &Value) -> Result<Detector> {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        let invalid = |e: serde_json::Error| DetectError::InvalidParams(e.to_string());
        let detector = match kind {
            "mad" => Detector::Mad(serde_json::from_value(params).map_err(invalid)?),
            "zscore" => Detector::ZScore(serde_json::from_value(params).map_err(invalid)?),
            "iqr" => Detector::Iqr(serde_json::from_value(params).map_err(invalid)?),
            "manual_bounds" => {
                Detector::ManualBounds(serde_json::from_value(params).map_err(invalid)?)
            }
            other => return Err(DetectError::UnknownType(other.to_string())),
        };
        detector.validate()?;
        Ok(detector)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Detector::Mad(_) => "mad",
            Detector::ZScore(_) => "zscore",
            Detector::Iqr(_) => "iqr",
            Detector::ManualBounds(_) => "manual_bounds",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Detector::Mad(d) => d.validate(),
            Detector::ZScore(d) => d.validate(),
            Detector::Iqr(d) => d.validate(),
            Detector::ManualBounds(d) => d.validate(),
        }
    }

    pub fn preprocessing(&self) -> &Preprocessing {
        static IDENTITY: std::sync::OnceLock<Preprocessing> = std::sync::OnceLock::new();
        match self {
            Detector::Mad(d) => &d.preprocessing,
            Detector::ZScore(d) => &d.preprocessing,
            Detector::Iqr(d) => &d.preprocessing,
            // Manual bounds judge raw values; no preprocessing applies.
            Detector::ManualBounds(_) => IDENTITY.get_or_init(Preprocessing::default),
        }
    }

    /// History positions needed before the first judged position.
    pub fn window_size(&self) -> usize {
        match self {
            Detector::Mad(d) => d.window_size,
            Detector::ZScore(d) => d.window_size,
            Detector::Iqr(d) => d.window_size,
            Detector::ManualBounds(_) => 0,
        }
    }

    /// Stable fingerprint: type name plus the sorted non-default params.
    ///
    /// Changing any non-default parameter starts a fresh stream of
    /// detection rows.
    pub fn fingerprint(&self) -> String {
        let mut params = Map::new();
        match self {
            Detector::Mad(d) => d.non_default_params(&mut params),
            Detector::ZScore(d) => d.non_default_params(&mut params),
            Detector::Iqr(d) => d.non_default_params(&mut params),
            Detector::ManualBounds(d) => d.non_default_params(&mut params),
        }
        // serde_json maps iterate in key order, so the rendering is stable.
        format!("{}|{}", self.kind(), Value::Object(params))
    }

    /// Non-default params as a JSON string, mirrored into metadata stores.
    pub fn params_json(&self) -> String {
        let mut params = Map::new();
        match self {
            Detector::Mad(d) => d.non_default_params(&mut params),
            Detector::ZScore(d) => d.non_default_params(&mut params),
            Detector::Iqr(d) => d.non_default_params(&mut params),
            Detector::ManualBounds(d) => d.non_default_params(&mut params),
        }
        Value::Object(params).to_string()
    }

    /// Judge `input` from `start_index` onward. Positions before
    /// `start_index` are history only.
    pub fn detect(&self, input: WindowInput<'_>, start_index: usize) -> Vec<DetectionResult> {
        match self {
            Detector::Mad(d) => d.detect(input, start_index),
            Detector::ZScore(d) => d.detect(input, start_index),
            Detector::Iqr(d) => d.detect(input, start_index),
            Detector::ManualBounds(d) => d.detect(input, start_index),
        }
    }
}

pub(crate) fn push_seasonality_params(
    components: &[SeasonalityComponent],
    min_samples_per_group: usize,
    default_min_group: usize,
    out: &mut Map<String, Value>,
) {
    if !components.is_empty() {
        let rendered: Vec<Value> = components
            .iter()
            .map(|c| match c {
                SeasonalityComponent::Column(name) => json!(name),
                SeasonalityComponent::Interaction(names) => json!(names),
            })
            .collect();
        out.insert("seasonality_components".into(), Value::Array(rendered));
    }
    if min_samples_per_group != default_min_group {
        out.insert("min_samples_per_group".into(), min_samples_per_group.into());
    }
}
