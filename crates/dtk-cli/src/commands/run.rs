use std::path::Path;

use chrono::NaiveDateTime;
use clap::Args;
use dtk_common::PipelineStep;
use dtk_config::{discover_metric_files, load_project_metrics, ProfilesConfig};
use dtk_pipeline::{open_database, RunOptions, TaskManager};

use crate::select::filter_metrics;
use crate::{CliError, CliResult};

#[derive(Args)]
pub struct RunArgs {
    /// Metric selectors: exact name, path glob or tag:<name>
    #[arg(long = "select", short = 's')]
    pub select: Vec<String>,

    /// Selectors to exclude after selection
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Pipeline steps to run (comma-separated: load,detect,alert)
    #[arg(long, value_delimiter = ',')]
    pub steps: Vec<String>,

    /// Load from this instant (YYYY-MM-DD[ HH:MM:SS])
    #[arg(long)]
    pub from: Option<String>,

    /// Load up to this instant, exclusive
    #[arg(long)]
    pub to: Option<String>,

    /// Purge and regenerate all datapoints and detections
    #[arg(long)]
    pub full_refresh: bool,

    /// Skip the per-metric lock (unsafe with concurrent runs)
    #[arg(long)]
    pub force: bool,

    /// Profile name from profiles.yml
    #[arg(long)]
    pub profile: Option<String>,
}

fn parse_instant(raw: &str, flag: &str) -> CliResult<NaiveDateTime> {
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(date) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(CliError::Config(format!(
        "invalid {flag} value '{raw}' (expected 'YYYY-MM-DD[ HH:MM:SS]')"
    )))
}

fn parse_steps(raw: &[String]) -> CliResult<Vec<PipelineStep>> {
    if raw.is_empty() {
        return Ok(PipelineStep::ALL.to_vec());
    }
    raw.iter()
        .map(|s| {
            s.parse::<PipelineStep>()
                .map_err(|e| CliError::Config(format!("--steps: {e}")))
        })
        .collect()
}

pub async fn execute(project_dir: &Path, args: RunArgs) -> CliResult<()> {
    let profiles = ProfilesConfig::from_yaml_file(&project_dir.join("profiles.yml"))?;

    let files = discover_metric_files(project_dir)?;
    let metrics = load_project_metrics(&files)?;

    let options = RunOptions {
        steps: parse_steps(&args.steps)?,
        from: args.from.as_deref().map(|r| parse_instant(r, "--from")).transpose()?,
        to: args.to.as_deref().map(|r| parse_instant(r, "--to")).transpose()?,
        full_refresh: args.full_refresh,
        force: args.force,
    };

    let selected = filter_metrics(&metrics, project_dir, &args.select, &args.exclude);
    if selected.is_empty() {
        return Err(CliError::Config("no metrics matched the selection".into()));
    }

    // Fail fast on an unknown --profile before any run starts.
    profiles.profile(args.profile.as_deref())?;

    // One manager per profile; a metric may pin itself to a profile, but
    // an explicit --profile overrides.
    let mut managers: std::collections::HashMap<String, TaskManager> =
        std::collections::HashMap::new();

    // Errors in one metric never abort the batch for the others.
    let mut failed = 0usize;
    for (path, config) in selected {
        if !config.enabled {
            tracing::info!(metric = %config.name, "Skipping disabled metric");
            continue;
        }

        let profile_name = match &args.profile {
            Some(explicit) => Some(explicit.as_str()),
            None => config.profile.as_deref(),
        };
        let profile = profiles.profile(profile_name)?;
        let manager_key = profile_name.unwrap_or("").to_string();
        if !managers.contains_key(&manager_key) {
            let db = open_database(profile, project_dir)?;
            managers.insert(
                manager_key.clone(),
                TaskManager::new(db, profiles.clone(), project_dir, profile.lock_timeout),
            );
        }
        let manager = &managers[&manager_key];

        tracing::info!(metric = %config.name, "Running pipeline");
        let relative = path.strip_prefix(project_dir).unwrap_or(path.as_path());
        let outcome = manager.run_metric(config, relative, &options).await;

        match outcome.status {
            dtk_common::TaskStatus::Success => {
                tracing::info!(
                    metric = %outcome.metric_name,
                    loaded = outcome.datapoints_loaded,
                    anomalies = outcome.anomalies_detected,
                    alerts = outcome.alerts_sent,
                    "Run finished"
                );
            }
            _ => {
                failed += 1;
                tracing::error!(
                    metric = %outcome.metric_name,
                    locked = outcome.locked,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Run failed"
                );
            }
        }
    }

    if failed > 0 {
        return Err(CliError::Operational(format!(
            "{failed} metric run(s) failed"
        )));
    }
    Ok(())
}
