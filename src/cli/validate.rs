//! Validation subcommand

use super::{print_json, Cli, CliError, OutputFormat};
use crate::config::{AppConfig, CredentialSource};
use crate::resume::store::read_checkpoint;
use clap::Parser;
use serde::Serialize;

/// Validate configuration, registry, credentials and checkpoint integrity
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Skip the credential settings check
    #[arg(long, default_value_t = false)]
    pub skip_credentials: bool,
}

/// Outcome of one validation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// Check name
    pub check: &'static str,
    /// Whether it passed
    pub ok: bool,
    /// Detail or error message
    pub detail: String,
}

impl CheckResult {
    fn pass(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(check: &'static str, detail: impl ToString) -> Self {
        Self {
            check,
            ok: false,
            detail: detail.to_string(),
        }
    }
}

/// Run every check against a loaded config. Never short-circuits.
pub fn run_checks(config: &AppConfig, skip_credentials: bool) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(match config.validate() {
        Ok(()) => CheckResult::pass("settings", "all settings valid"),
        Err(e) => CheckResult::fail("settings", e),
    });

    results.push(match config.date_range() {
        Ok(range) => CheckResult::pass(
            "date_range",
            format!("{} to {} ({} days, offset {})", range.start(), range.end(), range.num_days(), range.offset()),
        ),
        Err(e) => CheckResult::fail("date_range", e),
    });

    results.push(match config.load_registry() {
        Ok(registry) => CheckResult::pass("registry", format!("{} devices", registry.len())),
        Err(e) => CheckResult::fail("registry", e),
    });

    if !skip_credentials {
        results.push(match config.credential_source() {
            Ok(CredentialSource::Token(_)) => CheckResult::pass("credentials", "pre-issued token"),
            Ok(CredentialSource::Account(c)) => {
                CheckResult::pass("credentials", format!("account {} (app {})", c.email, c.app_id))
            }
            Err(e) => CheckResult::fail("credentials", e),
        });
    }

    let path = &config.checkpoint.path;
    results.push(match read_checkpoint(path) {
        Ok(Some(checkpoint)) => CheckResult::pass(
            "checkpoint",
            format!(
                "{}: schema v{}, {} devices complete, {} units recorded",
                path.display(),
                checkpoint.schema_version(),
                checkpoint.completed_devices().len(),
                checkpoint.total_units()
            ),
        ),
        Ok(None) => CheckResult::pass("checkpoint", format!("{}: not created yet", path.display())),
        Err(e) => CheckResult::fail("checkpoint", e),
    });

    results
}

impl ValidateArgs {
    /// Execute the validation command
    pub async fn execute(&self, cli: &Cli) -> Result<Vec<CheckResult>, CliError> {
        let mut config = AppConfig::load(&cli.config)?;
        config.apply_env_overrides();
        let results = run_checks(&config, self.skip_credentials);

        match cli.output_format {
            OutputFormat::Json => print_json(&results)?,
            OutputFormat::Human => {
                for result in &results {
                    let status = if result.ok { "OK  " } else { "FAIL" };
                    println!("[{status}] {}: {}", result.check, result.detail);
                }
            }
        }

        let failed: Vec<_> = results.iter().filter(|r| !r.ok).map(|r| r.check).collect();
        if failed.is_empty() {
            Ok(results)
        } else {
            Err(CliError::Validation(failed.join(", ")))
        }
    }
}
