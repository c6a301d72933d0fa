//! Reset command: delete the checkpoint

use super::{load_config, print_json, Cli, CliError, OutputFormat};
use crate::resume::{ResumeError, ResumeLock};
use clap::Parser;
use serde_json::json;
use tracing::info;

/// Arguments for the reset command
#[derive(Parser, Debug)]
pub struct ResetArgs {
    /// Confirm deletion of the checkpoint file
    #[arg(long, default_value_t = false)]
    pub yes: bool,
}

impl ResetArgs {
    /// Delete the checkpoint file. Requires `--yes` and a free checkpoint lock.
    pub async fn execute(&self, cli: &Cli) -> Result<bool, CliError> {
        if !self.yes {
            return Err(CliError::InvalidArgument(
                "reset deletes all collection progress; pass --yes to confirm".to_string(),
            ));
        }

        let config = load_config(&cli.config)?;
        let path = config.checkpoint.path.clone();
        let _lock = ResumeLock::try_acquire(&path)?;

        let removed = match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(ResumeError::IoError(format!(
                    "failed to delete {}: {e}",
                    path.display()
                ))
                .into())
            }
        };
        info!(path = %path.display(), removed, "Checkpoint reset");

        match cli.output_format {
            OutputFormat::Json => print_json(&json!({
                "checkpoint": path.display().to_string(),
                "removed": removed,
            }))?,
            OutputFormat::Human if removed => println!("Deleted checkpoint {}", path.display()),
            OutputFormat::Human => println!("No checkpoint at {}", path.display()),
        }
        Ok(removed)
    }
}
