use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use dtk_common::{format_ts, PipelineStep, TaskStatus};
use dtk_config::{MetricConfig, ProfilesConfig};
use dtk_pipeline::{open_database, RunOptions, TaskManager};
use dtk_store::{Database, InternalStore, SqlValue, TableNames};

const QUERY: &str = "SELECT ts AS timestamp, value FROM source_metrics \
                     WHERE ts >= '{from_date}' AND ts < '{to_date}' ORDER BY ts";

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn minutes(n: i64) -> NaiveDateTime {
    t0() + chrono::Duration::minutes(n)
}

struct Fixture {
    _dir: tempfile::TempDir,
    db: Arc<dyn Database>,
    manager: TaskManager,
}

fn profiles() -> ProfilesConfig {
    serde_yaml::from_str(
        "profiles:\n  dev:\n    type: sqlite\n    path: data/dtk.db\ndefault_profile: dev\n",
    )
    .unwrap()
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let profiles = profiles();
    let profile = profiles.profile(None).unwrap();
    let db = open_database(profile, dir.path()).unwrap();
    db.execute_ddl("CREATE TABLE source_metrics (ts TEXT NOT NULL, value REAL)")
        .unwrap();
    let manager = TaskManager::new(db.clone(), profiles, dir.path(), 3600);
    Fixture {
        db,
        manager,
        _dir: dir,
    }
}

fn insert_source(db: &Arc<dyn Database>, rows: &[(NaiveDateTime, Option<f64>)]) {
    let values: Vec<Vec<SqlValue>> = rows
        .iter()
        .map(|(ts, value)| {
            vec![
                SqlValue::from(format_ts(*ts)),
                SqlValue::from_opt_f64(*value),
            ]
        })
        .collect();
    db.insert("source_metrics", &["ts", "value"], &values)
        .unwrap();
}

fn metric(yaml: &str) -> MetricConfig {
    let config: MetricConfig = serde_yaml::from_str(yaml).unwrap();
    config.validate().unwrap();
    config
}

fn store(db: &Arc<dyn Database>) -> InternalStore {
    InternalStore::new(db.clone(), TableNames::default())
}

fn count(db: &Arc<dyn Database>, sql: &str) -> i64 {
    db.execute(sql, &[]).unwrap()[0]
        .get("n")
        .and_then(SqlValue::as_i64)
        .unwrap()
}

fn basic_metric() -> MetricConfig {
    metric(&format!(
        "name: cpu_usage\ninterval: 1min\nloading_start_time: \"2024-01-01 00:00:00\"\n\
         loading_batch_size: 40\nquery: \"{QUERY}\"\n"
    ))
}

fn run_options(steps: &[PipelineStep], to: NaiveDateTime) -> RunOptions {
    RunOptions {
        steps: steps.to_vec(),
        to: Some(to),
        ..RunOptions::default()
    }
}

#[tokio::test]
async fn load_is_idempotent_and_resumable() {
    let fx = fixture();
    let rows: Vec<(NaiveDateTime, Option<f64>)> =
        (0..100).map(|i| (minutes(i), Some(10.0 + i as f64))).collect();
    insert_source(&fx.db, &rows);
    let config = basic_metric();

    // First run stops partway through the range.
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("metrics/cpu.yml"), &run_options(&[PipelineStep::Load], minutes(60)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.datapoints_loaded, 60);

    let watermark = store(&fx.db).get_last_timestamp("cpu_usage").unwrap();
    assert_eq!(watermark, Some(minutes(59)));

    // Second run resumes from the watermark and completes the range.
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("metrics/cpu.yml"), &run_options(&[PipelineStep::Load], minutes(100)))
        .await;
    assert_eq!(outcome.datapoints_loaded, 40);
    assert_eq!(
        store(&fx.db).get_last_timestamp("cpu_usage").unwrap(),
        Some(minutes(99))
    );

    // Third run finds nothing new.
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("metrics/cpu.yml"), &run_options(&[PipelineStep::Load], minutes(100)))
        .await;
    assert_eq!(outcome.datapoints_loaded, 0);
    assert_eq!(
        count(&fx.db, "SELECT COUNT(*) AS n FROM _dtk_datapoints"),
        100
    );
}

#[tokio::test]
async fn loader_gap_fills_between_observed_points() {
    let fx = fixture();
    let config = metric(&format!(
        "name: sparse\ninterval: 10min\nloading_start_time: \"2024-01-01 00:00:00\"\n\
         query: \"{QUERY}\"\n"
    ));
    insert_source(
        &fx.db,
        &[(minutes(0), Some(0.5)), (minutes(30), Some(0.8))],
    );

    let outcome = fx
        .manager
        .run_metric(&config, Path::new("metrics/sparse.yml"), &run_options(&[PipelineStep::Load], minutes(60)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.datapoints_loaded, 4);

    let points = store(&fx.db)
        .load_window("sparse", minutes(60), 10)
        .unwrap();
    let values: Vec<Option<f64>> = points.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![Some(0.5), None, None, Some(0.8)]);
}

#[tokio::test]
async fn loader_captures_timestamp_seasonality() {
    let fx = fixture();
    let config = metric(&format!(
        "name: seasonal\ninterval: 1h\nloading_start_time: \"2024-01-01 00:00:00\"\n\
         seasonality_columns: [hour, dow, is_weekend]\nquery: \"{QUERY}\"\n"
    ));
    // 2024-01-06 is a Saturday.
    let saturday = NaiveDate::from_ymd_opt(2024, 1, 6)
        .unwrap()
        .and_hms_opt(15, 0, 0)
        .unwrap();
    insert_source(&fx.db, &[(saturday, Some(1.0))]);

    let options = RunOptions {
        steps: vec![PipelineStep::Load],
        from: Some(saturday),
        to: Some(saturday + chrono::Duration::hours(1)),
        ..RunOptions::default()
    };
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("metrics/seasonal.yml"), &options)
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);

    let points = store(&fx.db)
        .load_window("seasonal", saturday + chrono::Duration::hours(1), 1)
        .unwrap();
    let blob = &points[0].seasonality;
    assert_eq!(blob["hour"], 15);
    assert_eq!(blob["dow"], 5);
    assert_eq!(blob["is_weekend"], true);
}

fn detecting_metric() -> MetricConfig {
    metric(&format!(
        "name: api_errors\ninterval: 1min\nloading_start_time: \"2024-01-01 00:00:00\"\n\
         query: \"{QUERY}\"\n\
         detectors:\n  - type: mad\n    params:\n      threshold: 3.0\n      window_size: 10\n      min_samples: 3\n"
    ))
}

#[tokio::test]
async fn detect_is_idempotent() {
    let fx = fixture();
    let mut rows: Vec<(NaiveDateTime, Option<f64>)> =
        (0..10).map(|i| (minutes(i), Some(10.0))).collect();
    rows.push((minutes(10), Some(100.0)));
    rows.push((minutes(11), Some(10.0)));
    insert_source(&fx.db, &rows);
    let config = detecting_metric();

    let steps = [PipelineStep::Load, PipelineStep::Detect];
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("metrics/api.yml"), &run_options(&steps, minutes(12)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.anomalies_detected, 1);

    let total = count(&fx.db, "SELECT COUNT(*) AS n FROM _dtk_detections");
    assert_eq!(total, 12);

    // Second run: watermark already covers everything.
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("metrics/api.yml"), &run_options(&steps, minutes(12)))
        .await;
    assert_eq!(outcome.anomalies_detected, 0);
    assert_eq!(
        count(&fx.db, "SELECT COUNT(*) AS n FROM _dtk_detections"),
        total
    );
}

#[tokio::test]
async fn detection_rows_carry_verdicts_and_reasons() {
    let fx = fixture();
    let mut rows: Vec<(NaiveDateTime, Option<f64>)> =
        (0..10).map(|i| (minutes(i), Some(10.0))).collect();
    rows.push((minutes(10), Some(100.0)));
    insert_source(&fx.db, &rows);
    let config = detecting_metric();

    fx.manager
        .run_metric(
            &config,
            Path::new("metrics/api.yml"),
            &run_options(&[PipelineStep::Load, PipelineStep::Detect], minutes(11)),
        )
        .await;

    let rows = fx
        .db
        .execute(
            "SELECT timestamp, is_anomaly, direction, reason FROM _dtk_detections \
             ORDER BY timestamp",
            &[],
        )
        .unwrap();
    assert_eq!(rows.len(), 11);

    // Warm-up rows carry the insufficient_data reason.
    assert_eq!(
        rows[0].get("reason").and_then(SqlValue::as_str),
        Some("insufficient_data")
    );
    // The spike is flagged with its direction.
    let last = &rows[10];
    assert_eq!(last.get("is_anomaly").and_then(SqlValue::as_i64), Some(1));
    assert_eq!(last.get("direction").and_then(SqlValue::as_str), Some("above"));
}

#[tokio::test]
async fn full_refresh_regenerates_the_same_rows() {
    let fx = fixture();
    let mut rows: Vec<(NaiveDateTime, Option<f64>)> =
        (0..30).map(|i| (minutes(i), Some(10.0 + (i % 3) as f64))).collect();
    rows.push((minutes(30), Some(100.0)));
    insert_source(&fx.db, &rows);
    let config = detecting_metric();

    let steps = [PipelineStep::Load, PipelineStep::Detect];
    fx.manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&steps, minutes(31)))
        .await;
    let datapoints = count(&fx.db, "SELECT COUNT(*) AS n FROM _dtk_datapoints");
    let detections = count(&fx.db, "SELECT COUNT(*) AS n FROM _dtk_detections");
    let hashes = fx
        .db
        .execute("SELECT DISTINCT detector_hash AS h FROM _dtk_detections", &[])
        .unwrap();
    assert_eq!(hashes.len(), 1);
    let hash_before = hashes[0].get("h").and_then(SqlValue::as_str).unwrap().to_string();

    let options = RunOptions {
        steps: steps.to_vec(),
        to: Some(minutes(31)),
        full_refresh: true,
        ..RunOptions::default()
    };
    let outcome = fx.manager.run_metric(&config, Path::new("m.yml"), &options).await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);

    assert_eq!(count(&fx.db, "SELECT COUNT(*) AS n FROM _dtk_datapoints"), datapoints);
    assert_eq!(count(&fx.db, "SELECT COUNT(*) AS n FROM _dtk_detections"), detections);

    let hashes = fx
        .db
        .execute("SELECT DISTINCT detector_hash AS h FROM _dtk_detections", &[])
        .unwrap();
    assert_eq!(
        hashes[0].get("h").and_then(SqlValue::as_str).unwrap(),
        hash_before
    );
}

fn alerting_metric(extra: &str) -> MetricConfig {
    metric(&format!(
        "name: checkout\ninterval: 1min\nloading_start_time: \"2024-01-01 00:00:00\"\n\
         query: \"{QUERY}\"\n\
         detectors:\n  - type: mad\n    params:\n      threshold: 3.0\n      window_size: 10\n      min_samples: 3\n\
         alerting:\n  enabled: true\n  consecutive_anomalies: 3\n  direction: same\n{extra}"
    ))
}

fn spiky_series() -> Vec<(NaiveDateTime, Option<f64>)> {
    let values = [10.0, 10.0, 10.0, 10.0, 100.0, 10.0, 100.0, 10.0, 100.0, 100.0, 100.0];
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (minutes(i as i64), Some(*v)))
        .collect()
}

#[tokio::test]
async fn consecutive_confirmation_emits_one_alert() {
    let fx = fixture();
    insert_source(&fx.db, &spiky_series());
    let config = alerting_metric("");

    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&PipelineStep::ALL, minutes(11)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.alerts_sent, 1);

    let task = store(&fx.db).get_task("checkout").unwrap().unwrap();
    assert_eq!(task.alert_count, 1);
    assert!(task.last_alert_sent.is_some());
}

#[tokio::test]
async fn isolated_spike_does_not_alert() {
    let fx = fixture();
    // One 100 among 10s: a single anomalous point, not three in a row.
    let mut rows: Vec<(NaiveDateTime, Option<f64>)> =
        (0..10).map(|i| (minutes(i), Some(10.0))).collect();
    rows.push((minutes(10), Some(100.0)));
    rows.push((minutes(11), Some(10.0)));
    insert_source(&fx.db, &rows);
    let config = alerting_metric("");

    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&PipelineStep::ALL, minutes(12)))
        .await;
    assert_eq!(outcome.alerts_sent, 0);
}

#[tokio::test]
async fn stale_detections_do_not_alert_on_a_fresh_run() {
    let fx = fixture();
    insert_source(&fx.db, &spiky_series());
    let config = alerting_metric("");

    // Backfill detections without alerting.
    let outcome = fx
        .manager
        .run_metric(
            &config,
            Path::new("m.yml"),
            &run_options(&[PipelineStep::Load, PipelineStep::Detect], minutes(11)),
        )
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);

    // A later alert-only run sees no fresh detections and stays silent.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&[PipelineStep::Alert], minutes(11)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.alerts_sent, 0);
}

#[tokio::test]
async fn cooldown_suppresses_back_to_back_alerts() {
    let fx = fixture();
    insert_source(&fx.db, &spiky_series());
    let config = alerting_metric("  alert_cooldown: 30min\n");

    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&PipelineStep::ALL, minutes(11)))
        .await;
    assert_eq!(outcome.alerts_sent, 1);

    // More anomalous points arrive minutes later; the cooldown holds.
    insert_source(
        &fx.db,
        &[
            (minutes(11), Some(100.0)),
            (minutes(12), Some(100.0)),
            (minutes(13), Some(100.0)),
        ],
    );
    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&PipelineStep::ALL, minutes(14)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.alerts_sent, 0);

    let task = store(&fx.db).get_task("checkout").unwrap().unwrap();
    assert_eq!(task.alert_count, 1);
}

#[tokio::test]
async fn lock_serializes_concurrent_runs() {
    let fx = fixture();
    insert_source(&fx.db, &[(minutes(0), Some(1.0))]);
    let config = basic_metric();

    // Another process holds the lock.
    assert!(store(&fx.db).acquire_lock("cpu_usage", 3600).unwrap());

    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&[PipelineStep::Load], minutes(1)))
        .await;
    assert!(outcome.locked);
    assert_eq!(outcome.status, TaskStatus::Failed);

    // The foreign lock is untouched.
    let task = store(&fx.db).get_task("cpu_usage").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);

    // --force bypasses the lock.
    let options = RunOptions {
        steps: vec![PipelineStep::Load],
        to: Some(minutes(1)),
        force: true,
        ..RunOptions::default()
    };
    let outcome = fx.manager.run_metric(&config, Path::new("m.yml"), &options).await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
}

#[tokio::test]
async fn failed_step_releases_lock_with_error() {
    let fx = fixture();
    // The query references a table that does not exist.
    let config = metric(
        "name: broken\ninterval: 1min\nloading_start_time: \"2024-01-01 00:00:00\"\n\
         query: SELECT ts AS timestamp, value FROM missing_table\n",
    );

    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&[PipelineStep::Load], minutes(5)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Failed);
    assert!(outcome.error.is_some());

    let task = store(&fx.db).get_task("broken").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.last_error.is_some());
    // The lock is gone; a retry may proceed.
    assert!(store(&fx.db).acquire_lock("broken", 3600).unwrap());
}

#[tokio::test]
async fn no_data_alert_fires_when_the_source_goes_silent() {
    let fx = fixture();
    // Historical data only; nothing near the current wall clock.
    insert_source(&fx.db, &[(minutes(0), Some(1.0)), (minutes(1), Some(1.0))]);
    let config = alerting_metric("  no_data_alert: true\n");

    let outcome = fx
        .manager
        .run_metric(&config, Path::new("m.yml"), &run_options(&PipelineStep::ALL, minutes(2)))
        .await;
    assert_eq!(outcome.status, TaskStatus::Success, "{:?}", outcome.error);
    assert_eq!(outcome.alerts_sent, 1);
}

#[tokio::test]
async fn metric_metadata_is_mirrored() {
    let fx = fixture();
    insert_source(&fx.db, &[(minutes(0), Some(1.0))]);
    let config = basic_metric();

    fx.manager
        .run_metric(&config, Path::new("metrics/cpu.yml"), &run_options(&[PipelineStep::Load], minutes(1)))
        .await;

    let rows = fx
        .db
        .execute(
            "SELECT metric_name, path, interval, enabled FROM _dtk_metrics",
            &[],
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("metric_name").and_then(SqlValue::as_str),
        Some("cpu_usage")
    );
    assert_eq!(
        rows[0].get("path").and_then(SqlValue::as_str),
        Some("metrics/cpu.yml")
    );
    assert_eq!(rows[0].get("interval").and_then(SqlValue::as_str), Some("1min"));
}
