//! dtk - declarative anomaly monitoring for time-series metrics.
//!
//! `dtk init` scaffolds a project, `dtk run` executes the
//! LOAD → DETECT → ALERT pipeline for selected metrics, and
//! `dtk test-alert` pushes a synthetic event through a metric's channels.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod select;

use error::{CliError, CliResult};

#[derive(Parser)]
#[command(name = "dtk")]
#[command(version, about = "Anomaly detection for time-series metrics")]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new project
    Init(commands::init::InitArgs),

    /// Run the pipeline for selected metrics
    Run(commands::run::RunArgs),

    /// Send a synthetic alert through a metric's channels
    TestAlert(commands::test_alert::TestAlertArgs),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dtk=info")),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args),
        Commands::Run(args) => commands::run::execute(&cli.project_dir, args).await,
        Commands::TestAlert(args) => commands::test_alert::execute(&cli.project_dir, args).await,
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Operational(_) => 1,
        }
    }
}
