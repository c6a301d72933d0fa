//! Run command implementation

use super::{load_config, print_json, Cli, CliError, OutputFormat};
use crate::config::CredentialSource;
use crate::downloader::config::MAX_CONCURRENCY;
use crate::downloader::{Coordinator, FetchExecutor, RunSummary};
use crate::fetcher::auth::DEFAULT_TOKEN_LIFETIME_SECS;
use crate::fetcher::{
    build_http_client, ApiCredentialProvider, CredentialProvider, HttpDeviceFetcher,
    StaticCredentialProvider,
};
use crate::metrics;
use crate::output::CsvUnitSink;
use crate::resume::{CheckpointStore, ResumeLock};
use crate::shutdown::SharedShutdown;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Hide per-device progress bars
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,

    /// Concurrent fetches per device (overrides fetch.concurrency)
    #[arg(long, value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Total attempts per unit (overrides fetch.max_retries, range: 1-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: Option<u32>,
}

impl RunArgs {
    /// Execute a collection run and print its summary.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<RunSummary, CliError> {
        let mut config = load_config(&cli.config)?;
        if let Some(concurrency) = self.concurrency {
            config.fetch.concurrency = concurrency;
        }
        if let Some(max_retries) = self.max_retries {
            config.fetch.max_retries = max_retries;
        }
        config.validate()?;

        let source = config.credential_source()?;
        let range = config.date_range()?;
        let registry = config.load_registry()?;
        let lock = ResumeLock::try_acquire(&config.checkpoint.path)?;
        info!(lock = %lock.path().display(), devices = registry.len(), days = range.num_days(), "Run prepared");

        if let Some(addr) = config.metrics.listen_addr {
            metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::Metrics(e.to_string()))?;
        }

        let client = build_http_client(config.api.connect_timeout, config.fetch.request_timeout)?;
        let provider: Box<dyn CredentialProvider> = match source {
            CredentialSource::Token(token) => Box::new(StaticCredentialProvider::new(
                token,
                chrono::Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
            )),
            CredentialSource::Account(credentials) => Box::new(ApiCredentialProvider::new(
                client.clone(),
                config.api.base_url.as_str(),
                credentials,
            )),
        };
        let credential = provider.acquire().await?;

        let fetcher = Arc::new(HttpDeviceFetcher::new(client, config.api.base_url.as_str()));
        let executor = FetchExecutor::new(
            fetcher,
            config.retry_policy(),
            config.fetch.concurrency,
            shutdown.clone(),
        );
        let sink = CsvUnitSink::new(&config.output.dir, range.offset())
            .with_excluded_columns(&config.output.exclude_columns);
        let store = CheckpointStore::new(&config.checkpoint.path, config.persist_policy());

        let show_progress = !self.no_progress && cli.output_format == OutputFormat::Human;
        let coordinator = Coordinator::new(registry, range, store, executor, Arc::new(sink), shutdown)
            .with_progress(show_progress);

        let summary = coordinator.run(&credential).await?;
        match cli.output_format {
            OutputFormat::Json => print_json(&summary)?,
            OutputFormat::Human => print_human(&summary),
        }
        drop(lock);
        Ok(summary)
    }
}

fn print_human(summary: &RunSummary) {
    if summary.cancelled {
        println!("\nCollection interrupted - progress saved.");
    } else if summary.is_complete() {
        println!("\nCollection completed successfully!");
    } else {
        println!("\nCollection finished with incomplete devices.");
    }

    println!(
        "Devices: {} total, {} already complete, {} completed this run, {} incomplete",
        summary.devices_total,
        summary.devices_skipped,
        summary.devices_completed,
        summary.partial.len()
    );
    println!(
        "Units fetched: {} ({} records)",
        summary.units_fetched, summary.records
    );
    if summary.units_interrupted > 0 {
        println!("Units interrupted: {}", summary.units_interrupted);
    }

    for device in &summary.partial {
        println!(
            "  {} ({}): {} days done, {} remaining, {} failures",
            device.name, device.serial, device.days_done, device.days_remaining, device.failures
        );
    }

    if !summary.failures.is_empty() {
        println!("Failures: {}", summary.failures.len());
        for failure in &summary.failures {
            match failure.attempts {
                Some(attempts) => println!(
                    "  {}:{} [{}] after {} attempt(s): {}",
                    failure.serial, failure.day, failure.stage, attempts, failure.error
                ),
                None => println!(
                    "  {}:{} [{}]: {}",
                    failure.serial, failure.day, failure.stage, failure.error
                ),
            }
        }
    }
}
