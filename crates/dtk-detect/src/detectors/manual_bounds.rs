use dtk_common::Direction;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{DetectError, DetectionResult, Result, SkipReason, WindowInput};

/// Fixed-bound detector: values are judged against configured limits.
///
/// No window, no warm-up, no preprocessing; at least one bound must be
/// configured.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManualBoundsDetector {
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

impl ManualBoundsDetector {
    pub fn validate(&self) -> Result<()> {
        match (self.lower_bound, self.upper_bound) {
            (None, None) => Err(DetectError::InvalidParams(
                "At least one of lower_bound or upper_bound is required".into(),
            )),
            (Some(lo), Some(hi)) if lo >= hi => Err(DetectError::InvalidParams(
                "lower_bound must be less than upper_bound".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn detect(&self, input: WindowInput<'_>, start_index: usize) -> Vec<DetectionResult> {
        let mut results = Vec::with_capacity(input.values.len().saturating_sub(start_index));
        for i in start_index..input.values.len() {
            let Some(v) = input.values[i].filter(|x| x.is_finite()) else {
                results.push(DetectionResult::skipped(i, None, SkipReason::MissingData));
                continue;
            };

            let (direction, distance) = if self.upper_bound.is_some_and(|ub| v > ub) {
                (Direction::Above, v - self.upper_bound.unwrap())
            } else if self.lower_bound.is_some_and(|lb| v < lb) {
                (Direction::Below, self.lower_bound.unwrap() - v)
            } else {
                (Direction::None, 0.0)
            };

            let severity = match (direction, self.lower_bound, self.upper_bound) {
                (Direction::None, ..) => 0.0,
                (_, Some(lo), Some(hi)) => distance / (hi - lo),
                _ => distance,
            };

            let metadata = if direction == Direction::None {
                Value::Object(Map::new())
            } else {
                json!({
                    "direction": direction.to_string(),
                    "distance": distance,
                    "severity": severity,
                })
            };

            results.push(DetectionResult {
                index: i,
                value: Some(v),
                is_anomaly: direction != Direction::None,
                confidence_lower: self.lower_bound,
                confidence_upper: self.upper_bound,
                direction,
                severity,
                metadata,
                reason: None,
            });
        }
        results
    }

    pub fn non_default_params(&self, out: &mut Map<String, Value>) {
        if let Some(lo) = self.lower_bound {
            out.insert("lower_bound".into(), lo.into());
        }
        if let Some(hi) = self.upper_bound {
            out.insert("upper_bound".into(), hi.into());
        }
    }
}
