//! Input preprocessing applied before a detector sees the window.
//!
//! Order is fixed: input transformation, then smoothing. Recent-value
//! weighting does not rewrite the series; it changes the weights the
//! statistical detectors use (see [`crate::stats::recent_weights`]).

use serde::Deserialize;

use crate::{DetectError, Result};

/// How raw datapoint values become the detected series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    #[default]
    Raw,
    Diff,
    PctChange,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Raw => "raw",
            InputType::Diff => "diff",
            InputType::PctChange => "pct_change",
        }
    }
}

/// Preprocessing configuration shared by all detectors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Preprocessing {
    pub input_type: InputType,
    pub smoothing_window: usize,
    pub recent_weight: f64,
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self {
            input_type: InputType::Raw,
            smoothing_window: 1,
            recent_weight: 0.0,
        }
    }
}

impl Preprocessing {
    pub fn validate(&self) -> Result<()> {
        if self.smoothing_window < 1 {
            return Err(DetectError::InvalidParams(
                "smoothing_window must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recent_weight) {
            return Err(DetectError::InvalidParams(
                "recent_weight must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn is_default(&self) -> bool {
        *self == Preprocessing::default()
    }

    /// Apply transformation and smoothing to a raw series.
    pub fn apply(&self, raw: &[Option<f64>]) -> Vec<Option<f64>> {
        let transformed = match self.input_type {
            InputType::Raw => raw.to_vec(),
            InputType::Diff => diff(raw),
            InputType::PctChange => pct_change(raw),
        };
        if self.smoothing_window > 1 {
            smooth(&transformed, self.smoothing_window)
        } else {
            transformed
        }
    }

    /// Non-default fields, for fingerprints and metadata.
    pub fn non_default_params(&self, out: &mut serde_json::Map<String, serde_json::Value>) {
        if self.input_type != InputType::Raw {
            out.insert("input_type".into(), self.input_type.as_str().into());
        }
        if self.smoothing_window != 1 {
            out.insert("smoothing_window".into(), self.smoothing_window.into());
        }
        if self.recent_weight != 0.0 {
            out.insert("recent_weight".into(), self.recent_weight.into());
        }
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn diff(raw: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(raw.len());
    for i in 0..raw.len() {
        let y = if i == 0 {
            None
        } else {
            match (finite(raw[i]), finite(raw[i - 1])) {
                (Some(cur), Some(prev)) => Some(cur - prev),
                _ => None,
            }
        };
        out.push(y);
    }
    out
}

fn pct_change(raw: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(raw.len());
    for i in 0..raw.len() {
        let y = if i == 0 {
            None
        } else {
            match (finite(raw[i]), finite(raw[i - 1])) {
                (Some(cur), Some(prev)) if prev != 0.0 => Some((cur - prev) / prev),
                _ => None,
            }
        };
        out.push(y);
    }
    out
}

/// Trailing-mean smoothing over a window of `k` positions.
///
/// A position that is itself absent stays absent; gap markers must
/// survive smoothing so detectors can still report `missing_data`.
fn smooth(series: &[Option<f64>], k: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(series.len());
    for i in 0..series.len() {
        if finite(series[i]).is_none() {
            out.push(None);
            continue;
        }
        let start = (i + 1).saturating_sub(k);
        let window: Vec<f64> = series[start..=i].iter().filter_map(|v| finite(*v)).collect();
        if window.is_empty() {
            out.push(None);
        } else {
            out.push(Some(window.iter().sum::<f64>() / window.len() as f64));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| Some(*v)).collect()
    }

    #[test]
    fn raw_is_identity() {
        let p = Preprocessing::default();
        let input = vec![Some(1.0), None, Some(3.0)];
        assert_eq!(p.apply(&input), input);
    }

    #[test]
    fn diff_drops_first_position() {
        let p = Preprocessing {
            input_type: InputType::Diff,
            ..Default::default()
        };
        let out = p.apply(&some(&[1.0, 4.0, 9.0, 16.0]));
        assert_eq!(out, vec![None, Some(3.0), Some(5.0), Some(7.0)]);
    }

    #[test]
    fn diff_undoes_cumulative_sum() {
        // diff of a running sum recovers the original increments.
        let increments = [2.0, -1.0, 4.0, 0.5, 3.0];
        let mut cumulative = Vec::new();
        let mut acc = 0.0;
        for inc in increments {
            acc += inc;
            cumulative.push(Some(acc));
        }
        let p = Preprocessing {
            input_type: InputType::Diff,
            ..Default::default()
        };
        let out = p.apply(&cumulative);
        for (i, inc) in increments.iter().enumerate().skip(1) {
            assert!((out[i].unwrap() - inc).abs() < 1e-12);
        }
    }

    #[test]
    fn diff_breaks_across_gaps() {
        let p = Preprocessing {
            input_type: InputType::Diff,
            ..Default::default()
        };
        let out = p.apply(&[Some(1.0), None, Some(5.0)]);
        assert_eq!(out, vec![None, None, None]);
    }

    #[test]
    fn pct_change_guards_zero_denominator() {
        let p = Preprocessing {
            input_type: InputType::PctChange,
            ..Default::default()
        };
        let out = p.apply(&some(&[100.0, 110.0, 0.0, 50.0]));
        assert_eq!(out[0], None);
        assert!((out[1].unwrap() - 0.1).abs() < 1e-12);
        assert!((out[2].unwrap() - (-1.0)).abs() < 1e-12);
        assert_eq!(out[3], None); // previous value was zero
    }

    #[test]
    fn smoothing_takes_trailing_mean_of_finite_values() {
        let p = Preprocessing {
            smoothing_window: 3,
            ..Default::default()
        };
        let out = p.apply(&[Some(3.0), Some(6.0), None, Some(9.0)]);
        assert_eq!(out[0], Some(3.0));
        assert_eq!(out[1], Some(4.5));
        assert_eq!(out[2], None); // gaps stay gaps
        assert_eq!(out[3], Some(7.5)); // mean of 6 and 9
    }

    #[test]
    fn validation_rejects_bad_params() {
        let p = Preprocessing {
            smoothing_window: 0,
            ..Default::default()
        };
        assert!(p.validate().is_err());

        let p = Preprocessing {
            recent_weight: 1.5,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
