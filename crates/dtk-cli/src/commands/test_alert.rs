use std::path::Path;

use clap::Args;
use dtk_alert::{render_in_timezone, AlertData};
use dtk_common::{now_utc, Direction};
use dtk_config::{discover_metric_files, load_project_metrics, ProfilesConfig};
use dtk_pipeline::build_dispatcher;

use crate::{CliError, CliResult};

#[derive(Args)]
pub struct TestAlertArgs {
    /// Metric whose alert channels should receive the test event
    pub metric: String,

    /// Profile name from profiles.yml
    #[arg(long)]
    pub profile: Option<String>,
}

pub async fn execute(project_dir: &Path, args: TestAlertArgs) -> CliResult<()> {
    let profiles = ProfilesConfig::from_yaml_file(&project_dir.join("profiles.yml"))?;
    // Resolve the profile early so a bad --profile is an argument error.
    profiles.profile(args.profile.as_deref())?;

    let files = discover_metric_files(project_dir)?;
    let metrics = load_project_metrics(&files)?;
    let (_, config) = metrics
        .iter()
        .find(|(_, c)| c.name == args.metric)
        .ok_or_else(|| CliError::Config(format!("metric '{}' not found", args.metric)))?;

    let alerting = config
        .alerting
        .as_ref()
        .ok_or_else(|| CliError::Config(format!("metric '{}' has no alerting section", args.metric)))?;
    if alerting.channels.is_empty() {
        return Err(CliError::Config(format!(
            "metric '{}' has no alert channels configured",
            args.metric
        )));
    }

    let dispatcher =
        build_dispatcher(alerting, &profiles).map_err(|e| CliError::Config(format!("{e:#}")))?;

    let now = now_utc();
    let event = AlertData {
        metric_name: config.name.clone(),
        timestamp: now,
        timezone: alerting.timezone.clone(),
        local_time: render_in_timezone(now, &alerting.timezone),
        value: Some(42.0),
        confidence_lower: Some(10.0),
        confidence_upper: Some(30.0),
        direction: Direction::Above,
        severity: 3.5,
        detector_name: "test".to_string(),
        consecutive_count: 1,
        is_no_data: false,
    };

    let reports = dispatcher.dispatch(&event).await;
    let mut failed = 0usize;
    for report in &reports {
        if report.ok {
            println!("ok    {} ({})", report.channel, report.channel_type);
        } else {
            failed += 1;
            println!(
                "FAIL  {} ({}): {}",
                report.channel,
                report.channel_type,
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    if failed > 0 {
        return Err(CliError::Operational(format!(
            "{failed} of {} channel(s) failed",
            reports.len()
        )));
    }
    println!("Test alert delivered to {} channel(s)", reports.len());
    Ok(())
}
