use dtk_config::ConfigError;

/// CLI failure classes, mapped onto exit codes.
///
/// Configuration problems exit 2 without touching the database;
/// operational failures exit 1.
#[derive(Debug)]
pub enum CliError {
    Config(String),
    Operational(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Error: {msg}"),
            CliError::Operational(msg) => write!(f, "Error: {msg}"),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Operational(format!("{e:#}"))
    }
}

pub type CliResult<T> = Result<T, CliError>;
