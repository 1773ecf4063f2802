use std::path::Path;

use clap::Args;

use crate::{CliError, CliResult};

#[derive(Args)]
pub struct InitArgs {
    /// Name of the project directory to create
    pub name: String,
}

const PROFILES_TEMPLATE: &str = "\
# Database connection profiles. The engine stores its own state
# (datapoints, detections, tasks) in the same database.
profiles:
  dev:
    type: sqlite
    path: data/dtk.db

default_profile: dev

# Alert delivery channels, referenced by name from metric files.
alert_channels: {}
#  mattermost_alerts:
#    type: mattermost
#    webhook_url: ${MATTERMOST_WEBHOOK_URL}
";

const EXAMPLE_METRIC: &str = "\
# Example metric declaration. One file per metric under metrics/.
name: example_metric
description: Orders per 10 minutes
interval: 10min
enabled: false

# The query runs per time slice; dtk substitutes {from_date} / {to_date}.
query: |
  SELECT
    ts AS timestamp,
    orders AS value
  FROM orders_by_interval
  WHERE ts >= '{from_date}'
    AND ts < '{to_date}'
  ORDER BY ts

loading_start_time: \"2024-01-01 00:00:00\"

seasonality_columns:
  - hour
  - dow

detectors:
  - type: mad
    params:
      threshold: 3.0
      window_size: 288
      min_samples: 30
      seasonality_components: [hour]

alerting:
  enabled: true
  channels: []
  consecutive_anomalies: 3
  direction: same
  alert_cooldown: 1h
";

const GITIGNORE: &str = "data/\n";

pub fn execute(args: InitArgs) -> CliResult<()> {
    let root = Path::new(&args.name);
    if root.exists() {
        return Err(CliError::Config(format!(
            "directory '{}' already exists",
            args.name
        )));
    }

    let create = |path: &Path| {
        std::fs::create_dir_all(path)
            .map_err(|e| CliError::Operational(format!("creating {}: {e}", path.display())))
    };
    create(&root.join("metrics"))?;
    create(&root.join("sql"))?;
    create(&root.join("data"))?;

    let write = |path: &Path, content: &str| {
        std::fs::write(path, content)
            .map_err(|e| CliError::Operational(format!("writing {}: {e}", path.display())))
    };
    write(&root.join("profiles.yml"), PROFILES_TEMPLATE)?;
    write(&root.join("metrics/example_metric.yml"), EXAMPLE_METRIC)?;
    write(&root.join(".gitignore"), GITIGNORE)?;

    println!("Initialized dtk project in '{}'", args.name);
    println!("Next steps:");
    println!("  1. Edit {}/profiles.yml", args.name);
    println!("  2. Declare metrics under {}/metrics/", args.name);
    println!("  3. dtk run --project-dir {}", args.name);
    Ok(())
}
