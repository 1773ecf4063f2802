use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use dtk_common::{now_utc, PipelineStep, TaskStatus};
use dtk_config::{MetricConfig, ProfilesConfig};
use dtk_store::{Database, InternalStore, MetricMetaRow, TableNames};

use crate::loader::MetricLoader;
use crate::runner::DetectionRunner;

/// Options for one metric run, straight from the CLI flags.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub steps: Vec<PipelineStep>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    pub full_refresh: bool,
    pub force: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            steps: PipelineStep::ALL.to_vec(),
            from: None,
            to: None,
            full_refresh: false,
            force: false,
        }
    }
}

/// Result of one metric run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub metric_name: String,
    pub status: TaskStatus,
    pub steps_completed: Vec<PipelineStep>,
    pub datapoints_loaded: u64,
    pub anomalies_detected: u64,
    pub alerts_sent: u32,
    pub error: Option<String>,
    /// Another run holds a live lock; distinct from a step failure.
    pub locked: bool,
}

impl RunOutcome {
    fn new(metric_name: &str) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            status: TaskStatus::Failed,
            steps_completed: Vec::new(),
            datapoints_loaded: 0,
            anomalies_detected: 0,
            alerts_sent: 0,
            error: None,
            locked: false,
        }
    }
}

/// Per-metric pipeline orchestrator.
///
/// Owns lock acquisition, step sequencing and status bookkeeping. One
/// metric at a time; selector fan-out lives in the CLI.
pub struct TaskManager {
    db: Arc<dyn Database>,
    profiles: ProfilesConfig,
    project_dir: PathBuf,
    lock_timeout: u64,
}

impl TaskManager {
    pub fn new(
        db: Arc<dyn Database>,
        profiles: ProfilesConfig,
        project_dir: &Path,
        lock_timeout: u64,
    ) -> Self {
        Self {
            db,
            profiles,
            project_dir: project_dir.to_path_buf(),
            lock_timeout,
        }
    }

    fn store_for(&self, config: &MetricConfig) -> InternalStore {
        let mut tables = TableNames::default();
        if let Some(overrides) = &config.tables {
            if let Some(name) = &overrides.datapoints {
                tables.datapoints = name.clone();
            }
            if let Some(name) = &overrides.detections {
                tables.detections = name.clone();
            }
        }
        InternalStore::new(self.db.clone(), tables)
    }

    /// Run the selected steps for one metric.
    ///
    /// Every exit path either releases the lock or leaves one that will
    /// expire; `force` skips locking entirely.
    pub async fn run_metric(
        &self,
        config: &MetricConfig,
        file_path: &Path,
        options: &RunOptions,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::new(&config.name);
        let store = self.store_for(config);
        let run_started_at = now_utc();

        if let Err(e) = store.ensure_tables() {
            outcome.error = Some(e.to_string());
            return outcome;
        }

        let mut holds_lock = false;
        if !options.force {
            match store.acquire_lock(&config.name, self.lock_timeout) {
                Ok(true) => holds_lock = true,
                Ok(false) => {
                    tracing::warn!(metric = %config.name, "Metric is locked by another run");
                    outcome.locked = true;
                    outcome.error = Some("Failed to acquire lock: metric is running".to_string());
                    return outcome;
                }
                Err(e) => {
                    outcome.error = Some(e.to_string());
                    return outcome;
                }
            }
        }

        let result = self
            .run_steps(config, &store, options, run_started_at, &mut outcome)
            .await;

        match result {
            Ok(()) => {
                outcome.status = TaskStatus::Success;
            }
            Err(e) => {
                tracing::error!(metric = %config.name, error = %e, "Pipeline step failed");
                outcome.status = TaskStatus::Failed;
                outcome.error = Some(format!("{e:#}"));
            }
        }

        // Mirror the declared configuration; informational only.
        if let Err(e) = store.upsert_metric_meta(&metric_meta(config, file_path)) {
            tracing::warn!(metric = %config.name, error = %e, "Failed to mirror metric metadata");
        }

        if holds_lock {
            let released = store.release_lock(
                &config.name,
                outcome.status,
                outcome.error.as_deref(),
            );
            if let Err(e) = released {
                tracing::error!(metric = %config.name, error = %e, "Failed to release lock");
            }
        }

        outcome
    }

    async fn run_steps(
        &self,
        config: &MetricConfig,
        store: &InternalStore,
        options: &RunOptions,
        run_started_at: NaiveDateTime,
        outcome: &mut RunOutcome,
    ) -> anyhow::Result<()> {
        for step in PipelineStep::ALL {
            if !options.steps.contains(&step) {
                continue;
            }
            match step {
                PipelineStep::Load => {
                    let loader = MetricLoader::new(
                        config,
                        store,
                        self.db.clone(),
                        &self.project_dir,
                    );
                    let to = options
                        .to
                        .unwrap_or_else(|| config.interval.align(now_utc()));
                    outcome.datapoints_loaded =
                        loader.load_and_save(options.from, to, options.full_refresh)?;
                }
                PipelineStep::Detect => {
                    let runner = DetectionRunner::new(config, store);
                    outcome.anomalies_detected = runner.detect(options.full_refresh)?;
                }
                PipelineStep::Alert => {
                    outcome.alerts_sent = crate::alerting::run_alert_step(
                        config,
                        store,
                        &self.profiles,
                        run_started_at,
                        now_utc(),
                    )
                    .await?;
                }
            }
            outcome.steps_completed.push(step);
        }
        Ok(())
    }
}

fn metric_meta(config: &MetricConfig, file_path: &Path) -> MetricMetaRow {
    let alerting = config.alerting.as_ref();
    MetricMetaRow {
        metric_name: config.name.clone(),
        path: file_path.display().to_string(),
        interval: config.interval.to_string(),
        description: config.description.clone(),
        tags: config.tags.clone(),
        enabled: config.enabled,
        loading_batch_size: config.loading_batch_size,
        is_alert_enabled: alerting.is_some_and(|a| a.enabled),
        timezone: alerting.map(|a| a.timezone.clone()),
        direction: alerting.map(|a| a.direction.to_string()),
        consecutive_anomalies: alerting.map(|a| a.consecutive_anomalies).unwrap_or(3),
        min_detectors: alerting.map(|a| a.min_detectors).unwrap_or(1),
        no_data_alert: alerting.is_some_and(|a| a.no_data_alert),
    }
}

