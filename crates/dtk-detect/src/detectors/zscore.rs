use serde::Deserialize;
use serde_json::Map;

use super::{
    push_seasonality_params, run_statistical, validate_stat_params, StatFamily, StatSpec,
};
use crate::preprocess::Preprocessing;
use crate::seasonality::SeasonalityComponent;
use crate::{DetectionResult, Result, WindowInput};

pub const DEFAULT_THRESHOLD: f64 = 3.0;
pub const DEFAULT_WINDOW_SIZE: usize = 100;
pub const DEFAULT_MIN_SAMPLES: usize = 30;
pub const DEFAULT_MIN_SAMPLES_PER_GROUP: usize = 5;

/// Z-Score detector: mean/unbiased-stddev bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZScoreDetector {
    pub threshold: f64,
    pub window_size: usize,
    pub min_samples: usize,
    #[serde(flatten)]
    pub preprocessing: Preprocessing,
    pub seasonality_components: Vec<SeasonalityComponent>,
    pub min_samples_per_group: usize,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            window_size: DEFAULT_WINDOW_SIZE,
            min_samples: DEFAULT_MIN_SAMPLES,
            preprocessing: Preprocessing::default(),
            seasonality_components: Vec::new(),
            min_samples_per_group: DEFAULT_MIN_SAMPLES_PER_GROUP,
        }
    }
}

impl ZScoreDetector {
    pub fn validate(&self) -> Result<()> {
        validate_stat_params(
            self.threshold,
            self.window_size,
            self.min_samples,
            // Unbiased stddev needs at least two samples.
            2,
            &self.preprocessing,
        )
    }

    pub fn detect(&self, input: WindowInput<'_>, start_index: usize) -> Vec<DetectionResult> {
        let spec = StatSpec {
            threshold: self.threshold,
            window_size: self.window_size,
            min_samples: self.min_samples,
            preprocessing: &self.preprocessing,
            seasonality_components: &self.seasonality_components,
            min_samples_per_group: self.min_samples_per_group,
        };
        run_statistical(StatFamily::ZScore, &spec, input, start_index)
    }

    pub fn non_default_params(&self, out: &mut Map<String, serde_json::Value>) {
        if self.threshold != DEFAULT_THRESHOLD {
            out.insert("threshold".into(), self.threshold.into());
        }
        if self.window_size != DEFAULT_WINDOW_SIZE {
            out.insert("window_size".into(), self.window_size.into());
        }
        if self.min_samples != DEFAULT_MIN_SAMPLES {
            out.insert("min_samples".into(), self.min_samples.into());
        }
        self.preprocessing.non_default_params(out);
        push_seasonality_params(
            &self.seasonality_components,
            self.min_samples_per_group,
            DEFAULT_MIN_SAMPLES_PER_GROUP,
            out,
        );
    }
}
