//! CLI command implementations

pub mod error;
pub mod reset;
pub mod run;
pub mod status;
pub mod validate;

pub use error::CliError;
pub use reset::ResetArgs;
pub use run::RunArgs;
pub use status::StatusArgs;
pub use validate::ValidateArgs;

use crate::config::AppConfig;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Device Data Collector CLI
#[derive(Parser, Debug)]
#[command(name = "device-data-collector")]
#[command(about = "Collect historical per-device data with resumable checkpoints", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the YAML configuration file
    #[arg(long, short = 'c', global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect every remaining (device, day) unit
    Run(RunArgs),

    /// Show per-device progress from the checkpoint without fetching
    Status(StatusArgs),

    /// Check configuration, registry and checkpoint integrity
    Validate(ValidateArgs),

    /// Delete the checkpoint so the next run starts from scratch
    Reset(ResetArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Load the config file and apply environment overrides.
pub(crate) fn load_config(path: &Path) -> Result<AppConfig, CliError> {
    let mut config = AppConfig::load(path)?;
    config.apply_env_overrides();
    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Print a serializable value as a single JSON line.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let line = serde_json::to_string(value)
        .map_err(|e| CliError::InvalidArgument(format!("failed to encode output: {e}")))?;
    println!("{line}");
    Ok(())
}
