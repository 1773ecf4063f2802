use chrono::NaiveDateTime;
use dtk_common::{now_utc, SeasonalityData};
use dtk_config::MetricConfig;
use dtk_detect::{Detector, WindowInput};
use dtk_store::{DetectionRow, InternalStore};

/// Incremental detection driver: feeds each configured detector its
/// history window plus the new batch and persists the verdicts.
pub struct DetectionRunner<'a> {
    config: &'a MetricConfig,
    store: &'a InternalStore,
}

impl<'a> DetectionRunner<'a> {
    pub fn new(config: &'a MetricConfig, store: &'a InternalStore) -> Self {
        Self { config, store }
    }

    /// Run every configured detector over its undetected range. Returns
    /// the number of anomalies written. Running twice in succession
    /// writes zero new rows.
    pub fn detect(&self, full_refresh: bool) -> anyhow::Result<u64> {
        let detectors = self.config.build_detectors()?;
        if detectors.is_empty() {
            return Ok(0);
        }

        let Some(data_end) = self.store.get_last_timestamp(&self.config.name)? else {
            tracing::debug!(metric = %self.config.name, "No datapoints, skipping detection");
            return Ok(0);
        };

        let mut anomalies = 0u64;
        for detector in &detectors {
            anomalies += self.run_detector(detector, data_end, full_refresh)?;
        }
        Ok(anomalies)
    }

    fn run_detector(
        &self,
        detector: &Detector,
        data_end: NaiveDateTime,
        full_refresh: bool,
    ) -> anyhow::Result<u64> {
        let interval = self.config.interval;
        let hash = detector.fingerprint();

        if full_refresh {
            self.store.purge_detector(&self.config.name, &hash)?;
        }

        let configured_start = self.config.loading_start()?;
        let resumed = self
            .store
            .get_last_detection_timestamp(&self.config.name, &hash)?
            .map(|last| interval.next(last));
        let start = match (resumed, configured_start) {
            (Some(r), Some(c)) => r.max(c),
            (Some(r), None) => r,
            (None, Some(c)) => c,
            (None, None) => self
                .store
                .get_first_timestamp(&self.config.name)?
                .unwrap_or(data_end),
        };
        if start > data_end {
            return Ok(0);
        }

        // Every grid point in [start, data_end] is judged, in batches.
        let grid = interval.range(start, interval.next(data_end));
        let batch_size = self.config.loading_batch_size as usize;
        let mut anomalies = 0u64;

        for batch in grid.chunks(batch_size) {
            let batch_from = batch[0];
            let batch_to = interval.next(*batch.last().unwrap());
            anomalies += self.run_batch(detector, &hash, batch_from, batch_to, batch.len())?;
        }

        tracing::info!(
            metric = %self.config.name,
            detector = %hash,
            anomalies,
            "Detect step finished for detector"
        );
        Ok(anomalies)
    }

    fn run_batch(
        &self,
        detector: &Detector,
        hash: &str,
        batch_from: NaiveDateTime,
        batch_to: NaiveDateTime,
        batch_len: usize,
    ) -> anyhow::Result<u64> {
        // Enough history that the first batch position sees a full window.
        let need = detector.window_size() + batch_len;
        let points = self
            .store
            .load_window(&self.config.name, batch_to, need)?;
        if points.is_empty() {
            return Ok(0);
        }

        let Some(start_index) = points.iter().position(|p| p.timestamp >= batch_from) else {
            return Ok(0);
        };

        let raw: Vec<Option<f64>> = points.iter().map(|p| p.value).collect();
        let seasonality: Vec<SeasonalityData> =
            points.iter().map(|p| p.seasonality.clone()).collect();
        let preprocessed = detector.preprocessing().apply(&raw);

        let results = detector.detect(
            WindowInput {
                values: &preprocessed,
                seasonality: &seasonality,
            },
            start_index,
        );

        let created_at = now_utc();
        let mut rows = Vec::with_capacity(results.len());
        let mut anomalies = 0u64;
        for result in results {
            let timestamp = points[result.index].timestamp;
            if timestamp < batch_from || timestamp >= batch_to {
                continue;
            }
            if result.is_anomaly {
                anomalies += 1;
            }
            rows.push(DetectionRow {
                metric_name: self.config.name.clone(),
                detector_hash: hash.to_string(),
                timestamp,
                value: result.value,
                is_anomaly: result.is_anomaly,
                confidence_lower: result.confidence_lower,
                confidence_upper: result.confidence_upper,
                direction: result.direction,
                severity: result.severity,
                metadata: result.metadata,
                reason: result.reason.map(|r| r.as_str().to_string()),
                created_at,
            });
        }
        self.store.upsert_detections(&rows)?;
        Ok(anomalies)
    }
}
