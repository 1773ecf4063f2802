use std::sync::Arc;

use chrono::NaiveDateTime;
use dtk_common::{now_utc, Direction, SeasonalityData, SeriesPoint, TaskStatus};

use crate::adapter::{Database, Row, SqlValue};
use crate::{Result, StoreError};

pub const TABLE_DATAPOINTS: &str = "_dtk_datapoints";
pub const TABLE_DETECTIONS: &str = "_dtk_detections";
pub const TABLE_TASKS: &str = "_dtk_tasks";
pub const TABLE_METRICS: &str = "_dtk_metrics";

/// Resolved internal table names.
///
/// Datapoints and detections may be overridden per metric; tasks and
/// metric metadata are global.
#[derive(Debug, Clone)]
pub struct TableNames {
    pub datapoints: String,
    pub detections: String,
    pub tasks: String,
    pub metrics: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            datapoints: TABLE_DATAPOINTS.to_string(),
            detections: TABLE_DETECTIONS.to_string(),
            tasks: TABLE_TASKS.to_string(),
            metrics: TABLE_METRICS.to_string(),
        }
    }
}

/// One `_dtk_datapoints` row.
#[derive(Debug, Clone)]
pub struct DatapointRow {
    pub metric_name: String,
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
    pub seasonality_data: SeasonalityData,
    pub interval_seconds: u64,
    pub created_at: NaiveDateTime,
}

/// One `_dtk_detections` row.
#[derive(Debug, Clone)]
pub struct DetectionRow {
    pub metric_name: String,
    pub detector_hash: String,
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
    pub is_anomaly: bool,
    pub confidence_lower: Option<f64>,
    pub confidence_upper: Option<f64>,
    pub direction: Direction,
    pub severity: f64,
    pub metadata: serde_json::Value,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

/// One `_dtk_tasks` row.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub metric_name: String,
    pub status: TaskStatus,
    pub locked_at: Option<NaiveDateTime>,
    pub lock_expires_at: Option<NaiveDateTime>,
    pub last_run_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub last_alert_sent: Option<NaiveDateTime>,
    pub alert_count: i64,
}

/// Mirror of the declared metric configuration, written on every run.
/// Informational only; nothing in the engine reads it back.
#[derive(Debug, Clone)]
pub struct MetricMetaRow {
    pub metric_name: String,
    pub path: String,
    pub interval: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub enabled: bool,
    pub loading_batch_size: u64,
    pub is_alert_enabled: bool,
    pub timezone: Option<String>,
    pub direction: Option<String>,
    pub consecutive_anomalies: u32,
    pub min_detectors: u32,
    pub no_data_alert: bool,
}

/// Typed accessors over the four internal tables.
#[derive(Clone)]
pub struct InternalStore {
    db: Arc<dyn Database>,
    tables: TableNames,
}

impl InternalStore {
    pub fn new(db: Arc<dyn Database>, tables: TableNames) -> Self {
        Self { db, tables }
    }

    pub fn database(&self) -> &Arc<dyn Database> {
        &self.db
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Create any of the four tables that are missing.
    pub fn ensure_tables(&self) -> Result<()> {
        if !self.db.table_exists(&self.tables.datapoints)? {
            self.db.execute_ddl(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    metric_name      TEXT NOT NULL,
                    timestamp        INTEGER NOT NULL,
                    value            REAL,
                    seasonality_data TEXT NOT NULL DEFAULT '{{}}',
                    interval_seconds INTEGER NOT NULL,
                    created_at       INTEGER NOT NULL,
                    PRIMARY KEY (metric_name, timestamp)
                )",
                self.tables.datapoints
            ))?;
        }
        if !self.db.table_exists(&self.tables.detections)? {
            self.db.execute_ddl(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    metric_name      TEXT NOT NULL,
                    detector_hash    TEXT NOT NULL,
                    timestamp        INTEGER NOT NULL,
                    value            REAL,
                    is_anomaly       INTEGER NOT NULL DEFAULT 0,
                    confidence_lower REAL,
                    confidence_upper REAL,
                    direction        TEXT NOT NULL DEFAULT 'none',
                    severity         REAL NOT NULL DEFAULT 0,
                    metadata         TEXT NOT NULL DEFAULT '{{}}',
                    reason           TEXT,
                    created_at       INTEGER NOT NULL,
                    PRIMARY KEY (metric_name, detector_hash, timestamp)
                )",
                self.tables.detections
            ))?;
        }
        if !self.db.table_exists(&self.tables.tasks)? {
            self.db.execute_ddl(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    metric_name     TEXT NOT NULL PRIMARY KEY,
                    status          TEXT NOT NULL DEFAULT 'idle',
                    locked_at       INTEGER,
                    lock_expires_at INTEGER,
                    last_run_at     INTEGER,
                    last_error      TEXT,
                    last_alert_sent INTEGER,
                    alert_count     INTEGER NOT NULL DEFAULT 0,
                    updated_at      INTEGER NOT NULL
                )",
                self.tables.tasks
            ))?;
        }
        if !self.db.table_exists(&self.tables.metrics)? {
            self.db.execute_ddl(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    metric_name           TEXT NOT NULL PRIMARY KEY,
                    path                  TEXT NOT NULL,
                    interval              TEXT NOT NULL,
                    description           TEXT,
                    tags                  TEXT NOT NULL DEFAULT '',
                    enabled               INTEGER NOT NULL DEFAULT 1,
                    loading_batch_size    INTEGER NOT NULL,
                    is_alert_enabled      INTEGER NOT NULL DEFAULT 0,
                    timezone              TEXT,
                    direction             TEXT,
                    consecutive_anomalies INTEGER NOT NULL DEFAULT 3,
                    min_detectors         INTEGER NOT NULL DEFAULT 1,
                    no_data_alert         INTEGER NOT NULL DEFAULT 0,
                    updated_at            INTEGER NOT NULL
                )",
                self.tables.metrics
            ))?;
        }
        Ok(())
    }

    // ----- datapoints -----

    /// Write-or-replace datapoints keyed by (metric, timestamp).
    pub fn upsert_datapoints(&self, rows: &[DatapointRow]) -> Result<usize> {
        let columns = [
            "metric_name",
            "timestamp",
            "value",
            "seasonality_data",
            "interval_seconds",
            "created_at",
        ];
        let values: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|r| {
                Ok(vec![
                    SqlValue::from(r.metric_name.clone()),
                    SqlValue::from_timestamp(r.timestamp),
                    SqlValue::from_opt_f64(r.value),
                    SqlValue::from(serde_json::to_string(&r.seasonality_data)?),
                    SqlValue::Integer(r.interval_seconds as i64),
                    SqlValue::from_timestamp(r.created_at),
                ])
            })
            .collect::<Result<_>>()?;
        self.db.upsert(
            &self.tables.datapoints,
            &["metric_name", "timestamp"],
            &columns,
            &values,
        )
    }

    /// Highest datapoint timestamp, or `None` for an empty series.
    ///
    /// An empty series must come back as absence; a 1970 epoch sentinel
    /// here would silently re-load all history.
    pub fn get_last_timestamp(&self, metric: &str) -> Result<Option<NaiveDateTime>> {
        let rows = self.db.execute(
            &format!(
                "SELECT MAX(timestamp) AS ts FROM {} WHERE metric_name = ?1",
                self.tables.datapoints
            ),
            &[SqlValue::from(metric)],
        )?;
        Ok(rows.first().and_then(|r| r.get("ts")).and_then(SqlValue::as_timestamp))
    }

    /// Lowest datapoint timestamp, or `None` for an empty series.
    pub fn get_first_timestamp(&self, metric: &str) -> Result<Option<NaiveDateTime>> {
        let rows = self.db.execute(
            &format!(
                "SELECT MIN(timestamp) AS ts FROM {} WHERE metric_name = ?1",
                self.tables.datapoints
            ),
            &[SqlValue::from(metric)],
        )?;
        Ok(rows.first().and_then(|r| r.get("ts")).and_then(SqlValue::as_timestamp))
    }

    /// The `count` most recent datapoints strictly before `end_exclusive`,
    /// oldest first.
    pub fn load_window(
        &self,
        metric: &str,
        end_exclusive: NaiveDateTime,
        count: usize,
    ) -> Result<Vec<SeriesPoint>> {
        let rows = self.db.execute(
            &format!(
                "SELECT timestamp, value, seasonality_data FROM {}
                 WHERE metric_name = ?1 AND timestamp < ?2
                 ORDER BY timestamp DESC LIMIT ?3",
                self.tables.datapoints
            ),
            &[
                SqlValue::from(metric),
                SqlValue::from_timestamp(end_exclusive),
                SqlValue::Integer(count as i64),
            ],
        )?;
        let mut points: Vec<SeriesPoint> = rows
            .iter()
            .map(series_point_from_row)
            .collect::<Result<_>>()?;
        points.reverse();
        Ok(points)
    }

    /// Datapoints with timestamp in `[from, to)`, oldest first.
    pub fn load_range(
        &self,
        metric: &str,
        from: NaiveDateTime,
        to_exclusive: NaiveDateTime,
    ) -> Result<Vec<SeriesPoint>> {
        let rows = self.db.execute(
            &format!(
                "SELECT timestamp, value, seasonality_data FROM {}
                 WHERE metric_name = ?1 AND timestamp >= ?2 AND timestamp < ?3
                 ORDER BY timestamp ASC",
                self.tables.datapoints
            ),
            &[
                SqlValue::from(metric),
                SqlValue::from_timestamp(from),
                SqlValue::from_timestamp(to_exclusive),
            ],
        )?;
        rows.iter().map(series_point_from_row).collect()
    }

    // ----- detections -----

    pub fn upsert_detections(&self, rows: &[DetectionRow]) -> Result<usize> {
        let columns = [
            "metric_name",
            "detector_hash",
            "timestamp",
            "value",
            "is_anomaly",
            "confidence_lower",
            "confidence_upper",
            "direction",
            "severity",
            "metadata",
            "reason",
            "created_at",
        ];
        let values: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|r| {
                vec![
                    SqlValue::from(r.metric_name.clone()),
                    SqlValue::from(r.detector_hash.clone()),
                    SqlValue::from_timestamp(r.timestamp),
                    SqlValue::from_opt_f64(r.value),
                    SqlValue::Integer(r.is_anomaly as i64),
                    SqlValue::from_opt_f64(r.confidence_lower),
                    SqlValue::from_opt_f64(r.confidence_upper),
                    SqlValue::from(r.direction.to_string()),
                    SqlValue::Real(r.severity),
                    SqlValue::from(r.metadata.to_string()),
                    r.reason
                        .as_ref()
                        .map(|s| SqlValue::from(s.clone()))
                        .unwrap_or(SqlValue::Null),
                    SqlValue::from_timestamp(r.created_at),
                ]
            })
            .collect();
        self.db.upsert(
            &self.tables.detections,
            &["metric_name", "detector_hash", "timestamp"],
            &columns,
            &values,
        )
    }

    pub fn get_last_detection_timestamp(
        &self,
        metric: &str,
        detector_hash: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let rows = self.db.execute(
            &format!(
                "SELECT MAX(timestamp) AS ts FROM {}
                 WHERE metric_name = ?1 AND detector_hash = ?2",
                self.tables.detections
            ),
            &[SqlValue::from(metric), SqlValue::from(detector_hash)],
        )?;
        Ok(rows.first().and_then(|r| r.get("ts")).and_then(SqlValue::as_timestamp))
    }

    /// The `count` most recent detection rows per fingerprint, restricted
    /// to rows created after `created_after`. Newest first within each
    /// fingerprint. The freshness filter keeps historical backfill rows
    /// from triggering alerts.
    pub fn get_recent_detections(
        &self,
        metric: &str,
        detector_hashes: &[String],
        count: usize,
        created_after: NaiveDateTime,
    ) -> Result<Vec<DetectionRow>> {
        let mut out = Vec::new();
        for hash in detector_hashes {
            let rows = self.db.execute(
                &format!(
                    "SELECT * FROM {}
                     WHERE metric_name = ?1 AND detector_hash = ?2 AND created_at >= ?3
                     ORDER BY timestamp DESC LIMIT ?4",
                    self.tables.detections
                ),
                &[
                    SqlValue::from(metric),
                    SqlValue::from(hash.clone()),
                    SqlValue::from_timestamp(created_after),
                    SqlValue::Integer(count as i64),
                ],
            )?;
            for row in &rows {
                out.push(detection_row_from_row(row)?);
            }
        }
        Ok(out)
    }

    /// Full-refresh purge: drop all datapoints and detections of a metric.
    pub fn purge_metric(&self, metric: &str) -> Result<()> {
        self.db.delete(
            &self.tables.datapoints,
            "metric_name = ?1",
            &[SqlValue::from(metric)],
        )?;
        self.db.delete(
            &self.tables.detections,
            "metric_name = ?1",
            &[SqlValue::from(metric)],
        )?;
        Ok(())
    }

    /// Drop one fingerprint's detection stream.
    pub fn purge_detector(&self, metric: &str, detector_hash: &str) -> Result<()> {
        self.db.delete(
            &self.tables.detections,
            "metric_name = ?1 AND detector_hash = ?2",
            &[SqlValue::from(metric), SqlValue::from(detector_hash)],
        )?;
        Ok(())
    }

    // ----- tasks -----

    pub fn get_task(&self, metric: &str) -> Result<Option<TaskRow>> {
        let rows = self.db.execute(
            &format!(
                "SELECT * FROM {} WHERE metric_name = ?1",
                self.tables.tasks
            ),
            &[SqlValue::from(metric)],
        )?;
        rows.first().map(task_row_from_row).transpose()
    }

    /// Try to take the per-metric lock.
    ///
    /// Fails while another holder's lock is unexpired; an expired lock is
    /// considered stale and stolen with a warning.
    pub fn acquire_lock(&self, metric: &str, ttl_seconds: u64) -> Result<bool> {
        let now = now_utc();
        if let Some(task) = self.get_task(metric)? {
            if task.status == TaskStatus::Running {
                match task.lock_expires_at {
                    Some(expires) if expires > now => return Ok(false),
                    _ => {
                        tracing::warn!(metric, "Taking over stale lock");
                    }
                }
            }
        } else {
            self.insert_task_row(metric, now)?;
        }

        let expires = now + chrono::Duration::seconds(ttl_seconds as i64);
        self.db.execute(
            &format!(
                "UPDATE {} SET status = 'running', locked_at = ?2,
                 lock_expires_at = ?3, updated_at = ?4 WHERE metric_name = ?1",
                self.tables.tasks
            ),
            &[
                SqlValue::from(metric),
                SqlValue::from_timestamp(now),
                SqlValue::from_timestamp(expires),
                SqlValue::from_timestamp(now),
            ],
        )?;
        Ok(true)
    }

    /// Release the lock with a final status and optional error message.
    pub fn release_lock(
        &self,
        metric: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = now_utc();
        if self.get_task(metric)?.is_none() {
            self.insert_task_row(metric, now)?;
        }
        self.db.execute(
            &format!(
                "UPDATE {} SET status = ?2, locked_at = NULL, lock_expires_at = NULL,
                 last_run_at = ?3, last_error = ?4, updated_at = ?3 WHERE metric_name = ?1",
                self.tables.tasks
            ),
            &[
                SqlValue::from(metric),
                SqlValue::from(status.to_string()),
                SqlValue::from_timestamp(now),
                error.map(SqlValue::from).unwrap_or(SqlValue::Null),
            ],
        )?;
        Ok(())
    }

    pub fn get_last_alert_timestamp(&self, metric: &str) -> Result<Option<NaiveDateTime>> {
        Ok(self.get_task(metric)?.and_then(|t| t.last_alert_sent))
    }

    /// Record an emitted alert. Called before dispatch so the cooldown is
    /// consumed even when delivery fails.
    pub fn record_alert(&self, metric: &str, timestamp: NaiveDateTime) -> Result<()> {
        let now = now_utc();
        if self.get_task(metric)?.is_none() {
            self.insert_task_row(metric, now)?;
        }
        self.db.execute(
            &format!(
                "UPDATE {} SET last_alert_sent = ?2, alert_count = alert_count + 1,
                 updated_at = ?3 WHERE metric_name = ?1",
                self.tables.tasks
            ),
            &[
                SqlValue::from(metric),
                SqlValue::from_timestamp(timestamp),
                SqlValue::from_timestamp(now),
            ],
        )?;
        Ok(())
    }

    fn insert_task_row(&self, metric: &str, now: NaiveDateTime) -> Result<()> {
        self.db.insert(
            &self.tables.tasks,
            &["metric_name", "status", "alert_count", "updated_at"],
            &[vec![
                SqlValue::from(metric),
                SqlValue::from(TaskStatus::Idle.to_string()),
                SqlValue::Integer(0),
                SqlValue::from_timestamp(now),
            ]],
        )?;
        Ok(())
    }

    // ----- metric metadata -----

    pub fn upsert_metric_meta(&self, row: &MetricMetaRow) -> Result<()> {
        let columns = [
            "metric_name",
            "path",
            "interval",
            "description",
            "tags",
            "enabled",
            "loading_batch_size",
            "is_alert_enabled",
            "timezone",
            "direction",
            "consecutive_anomalies",
            "min_detectors",
            "no_data_alert",
            "updated_at",
        ];
        let values = vec![vec![
            SqlValue::from(row.metric_name.clone()),
            SqlValue::from(row.path.clone()),
            SqlValue::from(row.interval.clone()),
            row.description
                .as_ref()
                .map(|s| SqlValue::from(s.clone()))
                .unwrap_or(SqlValue::Null),
            SqlValue::from(row.tags.join(",")),
            SqlValue::Integer(row.enabled as i64),
            SqlValue::Integer(row.loading_batch_size as i64),
            SqlValue::Integer(row.is_alert_enabled as i64),
            row.timezone
                .as_ref()
                .map(|s| SqlValue::from(s.clone()))
                .unwrap_or(SqlValue::Null),
            row.direction
                .as_ref()
                .map(|s| SqlValue::from(s.clone()))
                .unwrap_or(SqlValue::Null),
            SqlValue::Integer(row.consecutive_anomalies as i64),
            SqlValue::Integer(row.min_detectors as i64),
            SqlValue::Integer(row.no_data_alert as i64),
            SqlValue::from_timestamp(now_utc()),
        ]];
        self.db
            .upsert(&self.tables.metrics, &["metric_name"], &columns, &values)?;
        Ok(())
    }
}

// ----- row mapping -----

fn get_required<'a>(row: &'a Row, column: &str) -> Result<&'a SqlValue> {
    row.get(column)
        .ok_or_else(|| StoreError::MalformedRow(format!("missing column '{column}'")))
}

fn series_point_from_row(row: &Row) -> Result<SeriesPoint> {
    let timestamp = get_required(row, "timestamp")?
        .as_timestamp()
        .ok_or_else(|| StoreError::MalformedRow("unreadable timestamp".into()))?;
    let value = row.get("value").and_then(SqlValue::as_f64);
    let seasonality: SeasonalityData = match row.get("seasonality_data").and_then(SqlValue::as_str)
    {
        Some(text) if !text.is_empty() => serde_json::from_str(text)?,
        _ => SeasonalityData::new(),
    };
    Ok(SeriesPoint {
        timestamp,
        value,
        seasonality,
    })
}

fn detection_row_from_row(row: &Row) -> Result<DetectionRow> {
    let timestamp = get_required(row, "timestamp")?
        .as_timestamp()
        .ok_or_else(|| StoreError::MalformedRow("unreadable timestamp".into()))?;
    let created_at = get_required(row, "created_at")?
        .as_timestamp()
        .ok_or_else(|| StoreError::MalformedRow("unreadable created_at".into()))?;
    let direction = row
        .get("direction")
        .and_then(SqlValue::as_str)
        .unwrap_or("none")
        .parse()
        .map_err(StoreError::MalformedRow)?;
    let metadata = match row.get("metadata").and_then(SqlValue::as_str) {
        Some(text) if !text.is_empty() => serde_json::from_str(text)?,
        _ => serde_json::Value::Object(Default::default()),
    };
    Ok(DetectionRow {
        metric_name: get_required(row, "metric_name")?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        detector_hash: get_required(row, "detector_hash")?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        timestamp,
        value: row.get("value").and_then(SqlValue::as_f64),
        is_anomaly: row
            .get("is_anomaly")
            .and_then(SqlValue::as_i64)
            .unwrap_or(0)
            != 0,
        confidence_lower: row.get("confidence_lower").and_then(SqlValue::as_f64),
        confidence_upper: row.get("confidence_upper").and_then(SqlValue::as_f64),
        direction,
        severity: row.get("severity").and_then(SqlValue::as_f64).unwrap_or(0.0),
        metadata,
        reason: row
            .get("reason")
            .and_then(SqlValue::as_str)
            .map(|s| s.to_string()),
        created_at,
    })
}

fn task_row_from_row(row: &Row) -> Result<TaskRow> {
    let status: TaskStatus = row
        .get("status")
        .and_then(SqlValue::as_str)
        .unwrap_or("idle")
        .parse()
        .map_err(StoreError::MalformedRow)?;
    Ok(TaskRow {
        metric_name: get_required(row, "metric_name")?
            .as_str()
            .unwrap_or_default()
            .to_string(),
        status,
        locked_at: row.get("locked_at").and_then(SqlValue::as_timestamp),
        lock_expires_at: row.get("lock_expires_at").and_then(SqlValue::as_timestamp),
        last_run_at: row.get("last_run_at").and_then(SqlValue::as_timestamp),
        last_error: row
            .get("last_error")
            .and_then(SqlValue::as_str)
            .map(|s| s.to_string()),
        last_alert_sent: row.get("last_alert_sent").and_then(SqlValue::as_timestamp),
        alert_count: row.get("alert_count").and_then(SqlValue::as_i64).unwrap_or(0),
    })
}
