use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use dtk_common::{Direction, TaskStatus};

use crate::adapter::SqlValue;
use crate::internal::{DatapointRow, DetectionRow, InternalStore, TableNames};
use crate::sqlite::SqliteDatabase;
use crate::Database;

fn ts(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn store() -> InternalStore {
    let db = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let store = InternalStore::new(db, TableNames::default());
    store.ensure_tables().unwrap();
    store
}

fn datapoint(metric: &str, timestamp: NaiveDateTime, value: Option<f64>) -> DatapointRow {
    DatapointRow {
        metric_name: metric.to_string(),
        timestamp,
        value,
        seasonality_data: Default::default(),
        interval_seconds: 600,
        created_at: ts(1, 0, 0),
    }
}

fn detection(
    metric: &str,
    hash: &str,
    timestamp: NaiveDateTime,
    is_anomaly: bool,
    created_at: NaiveDateTime,
) -> DetectionRow {
    DetectionRow {
        metric_name: metric.to_string(),
        detector_hash: hash.to_string(),
        timestamp,
        value: Some(1.0),
        is_anomaly,
        confidence_lower: Some(0.0),
        confidence_upper: Some(2.0),
        direction: if is_anomaly {
            Direction::Above
        } else {
            Direction::None
        },
        severity: if is_anomaly { 3.0 } else { 0.0 },
        metadata: serde_json::json!({}),
        reason: None,
        created_at,
    }
}

#[test]
fn ensure_tables_is_idempotent() {
    let store = store();
    store.ensure_tables().unwrap();
    assert!(store.database().table_exists("_dtk_datapoints").unwrap());
    assert!(store.database().table_exists("_dtk_detections").unwrap());
    assert!(store.database().table_exists("_dtk_tasks").unwrap());
    assert!(store.database().table_exists("_dtk_metrics").unwrap());
}

#[test]
fn last_timestamp_is_absent_for_empty_series() {
    let store = store();
    assert_eq!(store.get_last_timestamp("cpu_usage").unwrap(), None);
}

#[test]
fn upsert_datapoints_replaces_by_key() {
    let store = store();
    store
        .upsert_datapoints(&[
            datapoint("cpu_usage", ts(1, 0, 0), Some(1.0)),
            datapoint("cpu_usage", ts(1, 0, 10), Some(2.0)),
        ])
        .unwrap();
    // Same key, new value: must replace, not duplicate.
    store
        .upsert_datapoints(&[datapoint("cpu_usage", ts(1, 0, 10), Some(5.0))])
        .unwrap();

    let points = store.load_window("cpu_usage", ts(2, 0, 0), 10).unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[1].value, Some(5.0));
    assert_eq!(store.get_last_timestamp("cpu_usage").unwrap(), Some(ts(1, 0, 10)));
}

#[test]
fn null_values_survive_the_round_trip() {
    let store = store();
    store
        .upsert_datapoints(&[datapoint("cpu_usage", ts(1, 0, 0), None)])
        .unwrap();
    let points = store.load_window("cpu_usage", ts(2, 0, 0), 10).unwrap();
    assert_eq!(points[0].value, None);
}

#[test]
fn load_window_is_bounded_and_oldest_first() {
    let store = store();
    let rows: Vec<DatapointRow> = (0..6)
        .map(|i| datapoint("cpu_usage", ts(1, 0, i * 10), Some(i as f64)))
        .collect();
    store.upsert_datapoints(&rows).unwrap();

    // end_exclusive cuts off the last point; count trims from the left.
    let points = store.load_window("cpu_usage", ts(1, 0, 50), 3).unwrap();
    let values: Vec<Option<f64>> = points.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![Some(2.0), Some(3.0), Some(4.0)]);
}

#[test]
fn detection_watermark_tracks_per_fingerprint() {
    let store = store();
    store
        .upsert_detections(&[
            detection("m", "mad|{}", ts(1, 0, 0), false, ts(1, 1, 0)),
            detection("m", "mad|{}", ts(1, 0, 10), true, ts(1, 1, 0)),
            detection("m", "zscore|{}", ts(1, 0, 0), false, ts(1, 1, 0)),
        ])
        .unwrap();

    assert_eq!(
        store.get_last_detection_timestamp("m", "mad|{}").unwrap(),
        Some(ts(1, 0, 10))
    );
    assert_eq!(
        store.get_last_detection_timestamp("m", "zscore|{}").unwrap(),
        Some(ts(1, 0, 0))
    );
    assert_eq!(store.get_last_detection_timestamp("m", "iqr|{}").unwrap(), None);
}

#[test]
fn recent_detections_respect_created_after() {
    let store = store();
    store
        .upsert_detections(&[
            detection("m", "mad|{}", ts(1, 0, 0), true, ts(1, 0, 30)),
            detection("m", "mad|{}", ts(1, 0, 10), true, ts(1, 2, 0)),
            detection("m", "mad|{}", ts(1, 0, 20), true, ts(1, 2, 0)),
        ])
        .unwrap();

    // Only rows created after the cutoff are fresh enough to alert on.
    let fresh = store
        .get_recent_detections("m", &["mad|{}".to_string()], 10, ts(1, 1, 0))
        .unwrap();
    assert_eq!(fresh.len(), 2);
    // Newest first within a fingerprint.
    assert_eq!(fresh[0].timestamp, ts(1, 0, 20));
    assert_eq!(fresh[1].timestamp, ts(1, 0, 10));
}

#[test]
fn purge_metric_clears_both_tables() {
    let store = store();
    store
        .upsert_datapoints(&[datapoint("m", ts(1, 0, 0), Some(1.0))])
        .unwrap();
    store
        .upsert_detections(&[detection("m", "mad|{}", ts(1, 0, 0), false, ts(1, 0, 0))])
        .unwrap();

    store.purge_metric("m").unwrap();

    assert_eq!(store.get_last_timestamp("m").unwrap(), None);
    assert_eq!(store.get_last_detection_timestamp("m", "mad|{}").unwrap(), None);
}

#[test]
fn lock_excludes_second_holder_until_expiry() {
    let store = store();
    assert!(store.acquire_lock("m", 3600).unwrap());
    // Live lock: second acquisition fails.
    assert!(!store.acquire_lock("m", 3600).unwrap());

    let task = store.get_task("m").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert!(task.lock_expires_at.is_some());

    store.release_lock("m", TaskStatus::Success, None).unwrap();
    let task = store.get_task("m").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert!(task.lock_expires_at.is_none());

    // Released lock can be re-acquired.
    assert!(store.acquire_lock("m", 3600).unwrap());
}

#[test]
fn stale_lock_is_stolen() {
    let store = store();
    // TTL of zero expires immediately.
    assert!(store.acquire_lock("m", 0).unwrap());
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert!(store.acquire_lock("m", 3600).unwrap());
}

#[test]
fn release_records_error_message() {
    let store = store();
    store.acquire_lock("m", 3600).unwrap();
    store
        .release_lock("m", TaskStatus::Failed, Some("connection timeout"))
        .unwrap();

    let task = store.get_task("m").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.last_error.as_deref(), Some("connection timeout"));
}

#[test]
fn record_alert_advances_bookkeeping() {
    let store = store();
    assert_eq!(store.get_last_alert_timestamp("m").unwrap(), None);

    store.record_alert("m", ts(1, 12, 0)).unwrap();
    store.record_alert("m", ts(1, 13, 0)).unwrap();

    let task = store.get_task("m").unwrap().unwrap();
    assert_eq!(task.last_alert_sent, Some(ts(1, 13, 0)));
    assert_eq!(task.alert_count, 2);
}

#[test]
fn table_names_can_be_overridden_per_metric() {
    let db = Arc::new(SqliteDatabase::open_in_memory().unwrap());
    let tables = TableNames {
        datapoints: "custom_datapoints".to_string(),
        ..TableNames::default()
    };
    let store = InternalStore::new(db.clone(), tables);
    store.ensure_tables().unwrap();

    store
        .upsert_datapoints(&[datapoint("m", ts(1, 0, 0), Some(1.0))])
        .unwrap();
    assert!(db.table_exists("custom_datapoints").unwrap());

    let rows = db
        .execute("SELECT COUNT(*) AS n FROM custom_datapoints", &[])
        .unwrap();
    assert_eq!(rows[0].get("n").and_then(SqlValue::as_i64), Some(1));
}

#[test]
fn sqlite_adapter_round_trips_values_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db = SqliteDatabase::open(&dir.path().join("dtk.db")).unwrap();
    db.execute_ddl("CREATE TABLE t (a INTEGER, b REAL, c TEXT)")
        .unwrap();
    db.insert(
        "t",
        &["a", "b", "c"],
        &[vec![
            SqlValue::Integer(7),
            SqlValue::Real(1.5),
            SqlValue::from("hello"),
        ]],
    )
    .unwrap();

    let rows = db.execute("SELECT a, b, c FROM t", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("a"), Some(&SqlValue::Integer(7)));
    assert_eq!(rows[0].get("b"), Some(&SqlValue::Real(1.5)));
    assert_eq!(rows[0].get("c").and_then(SqlValue::as_str), Some("hello"));
}

#[test]
fn timestamp_cells_accept_text_and_epoch_forms() {
    let text = SqlValue::from("2024-01-05 10:30:00");
    assert_eq!(text.as_timestamp(), Some(ts(5, 10, 30)));

    let date_only = SqlValue::from("2024-01-05");
    assert_eq!(date_only.as_timestamp(), Some(ts(5, 0, 0)));

    let epoch_secs = SqlValue::Integer(ts(5, 10, 30).and_utc().timestamp());
    assert_eq!(epoch_secs.as_timestamp(), Some(ts(5, 10, 30)));

    let epoch_millis = SqlValue::Integer(ts(5, 10, 30).and_utc().timestamp_millis());
    assert_eq!(epoch_millis.as_timestamp(), Some(ts(5, 10, 30)));
}
