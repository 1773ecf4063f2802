use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDateTime, Timelike};
use dtk_common::{now_utc, SeasonalityData};
use dtk_config::MetricConfig;
use dtk_store::{DatapointRow, Database, InternalStore, SqlValue};
use serde_json::json;

use crate::query_template::render_query;

/// Executes the user query slice by slice and persists normalized,
/// gap-filled datapoints.
pub struct MetricLoader<'a> {
    config: &'a MetricConfig,
    store: &'a InternalStore,
    data_db: Arc<dyn Database>,
    project_dir: &'a Path,
}

impl<'a> MetricLoader<'a> {
    pub fn new(
        config: &'a MetricConfig,
        store: &'a InternalStore,
        data_db: Arc<dyn Database>,
        project_dir: &'a Path,
    ) -> Self {
        Self {
            config,
            store,
            data_db,
            project_dir,
        }
    }

    /// Load `[from, to)` and return the number of rows written.
    ///
    /// Committed slices survive a mid-run failure; the next invocation
    /// resumes from the new watermark. Re-running over unchanged source
    /// data writes the same rows again (keyed replace), leaving the
    /// visible set untouched.
    pub fn load_and_save(
        &self,
        from: Option<NaiveDateTime>,
        to: NaiveDateTime,
        full_refresh: bool,
    ) -> anyhow::Result<u64> {
        let interval = self.config.interval;
        let configured_start = self.config.loading_start()?;

        if full_refresh {
            tracing::info!(metric = %self.config.name, "Full refresh: purging datapoints and detections");
            self.store.purge_metric(&self.config.name)?;
        }

        let start = if full_refresh {
            from.or(configured_start)
        } else {
            match from {
                Some(explicit) => Some(explicit),
                None => {
                    let resumed = self
                        .store
                        .get_last_timestamp(&self.config.name)?
                        .map(|last| interval.next(last));
                    match (resumed, configured_start) {
                        (Some(r), Some(c)) => Some(r.max(c)),
                        (Some(r), None) => Some(r),
                        (None, c) => c,
                    }
                }
            }
        };
        let Some(start) = start else {
            bail!(
                "No existing data for '{}' and no loading_start_time or --from given",
                self.config.name
            );
        };

        let from = interval.align(start);
        let to = interval.align(to);
        if from >= to {
            return Ok(0);
        }

        let grid = interval.range(from, to);
        let query = self.config.query_text(self.project_dir)?;
        let mut written = 0u64;

        for slice in grid.chunks(self.config.loading_batch_size as usize) {
            let slice_from = slice[0];
            let slice_to = interval.next(*slice.last().unwrap());
            written += self
                .load_slice(&query, slice_from, slice_to)
                .with_context(|| {
                    format!(
                        "loading slice [{slice_from}, {slice_to}) of '{}'",
                        self.config.name
                    )
                })?;
        }

        tracing::info!(
            metric = %self.config.name,
            rows = written,
            from = %from,
            to = %to,
            "Load step finished"
        );
        Ok(written)
    }

    fn load_slice(
        &self,
        query: &str,
        slice_from: NaiveDateTime,
        slice_to: NaiveDateTime,
    ) -> anyhow::Result<u64> {
        let interval = self.config.interval;
        let sql = render_query(query, slice_from, slice_to, interval.seconds());
        let rows = self.data_db.execute(&sql, &[])?;

        let ts_column = &self.config.query_columns.timestamp;
        let value_column = &self.config.query_columns.metric;

        // Normalize onto the interval grid; last row wins per grid point.
        let mut observed: BTreeMap<NaiveDateTime, (Option<f64>, SeasonalityData)> =
            BTreeMap::new();
        for row in &rows {
            let raw_ts = row
                .get(ts_column.as_str())
                .with_context(|| format!("query must return '{ts_column}' column"))?;
            let ts = raw_ts
                .as_timestamp()
                .with_context(|| format!("unreadable '{ts_column}' value in query result"))?;
            let value = match row.get(value_column.as_str()) {
                Some(cell) => cell.as_f64(),
                None => bail!("query must return '{value_column}' column"),
            };

            let aligned = interval.align(ts);
            if aligned < slice_from || aligned >= slice_to {
                continue;
            }

            let mut seasonality = SeasonalityData::new();
            for column in &self.config.query_columns.seasonality {
                if let Some(cell) = row.get(column.as_str()) {
                    seasonality.insert(column.clone(), sql_value_to_json(cell));
                }
            }
            observed.insert(aligned, (value, seasonality));
        }

        if observed.is_empty() {
            return Ok(0);
        }

        // Gap-fill the grid between the first and last observed points.
        // The trailing edge is left unfilled so a silent source remains
        // visible to the no-data alert.
        let first = *observed.keys().next().unwrap();
        let last = *observed.keys().next_back().unwrap();
        let created_at = now_utc();
        let mut out = Vec::new();
        for ts in interval.range(first, interval.next(last)) {
            let (value, mut seasonality) = observed.remove(&ts).unwrap_or((None, SeasonalityData::new()));
            self.extract_timestamp_seasonality(ts, &mut seasonality);
            out.push(DatapointRow {
                metric_name: self.config.name.clone(),
                timestamp: ts,
                value,
                seasonality_data: seasonality,
                interval_seconds: interval.seconds(),
                created_at,
            });
        }

        let written = self.store.upsert_datapoints(&out)?;
        Ok(written as u64)
    }

    /// Fill in the seasonality columns computed from the timestamp.
    /// Columns sourced from the query output are already present.
    fn extract_timestamp_seasonality(&self, ts: NaiveDateTime, out: &mut SeasonalityData) {
        for column in &self.config.seasonality_columns {
            let name = column.name();
            if out.contains_key(name) {
                continue;
            }
            let Some(extractor) = column.extractor() else {
                continue;
            };
            let value = match extractor {
                "hour" => json!(ts.hour()),
                "day" => json!(ts.day()),
                "dow" | "day_of_week" => json!(ts.weekday().num_days_from_monday()),
                "month" => json!(ts.month()),
                "quarter" => json!((ts.month() - 1) / 3 + 1),
                "year" => json!(ts.year()),
                "is_weekend" => json!(ts.weekday().num_days_from_monday() >= 5),
                _ => continue,
            };
            out.insert(name.to_string(), value);
        }
    }
}

fn sql_value_to_json(cell: &SqlValue) -> serde_json::Value {
    match cell {
        SqlValue::Null => serde_json::Value::Null,
        SqlValue::Integer(i) => json!(i),
        SqlValue::Real(f) => json!(f),
        SqlValue::Text(s) => json!(s),
    }
}
