//! Main entry point for the device-data-collector CLI

use clap::Parser;
use device_data_collector::cli::{Cli, Commands};
use device_data_collector::shutdown::{spawn_signal_listener, ShutdownSignal};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("device_data_collector=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let shutdown = ShutdownSignal::shared();
    let listener = spawn_signal_listener(shutdown.clone());

    let result: anyhow::Result<()> = match cli.command {
        Commands::Run(ref args) => args
            .execute(&cli, shutdown.clone())
            .await
            .map(|_| ())
            .map_err(anyhow::Error::from),
        Commands::Status(ref args) => args.execute(&cli).await.map(|_| ()).map_err(anyhow::Error::from),
        Commands::Validate(ref args) => args.execute(&cli).await.map(|_| ()).map_err(anyhow::Error::from),
        Commands::Reset(ref args) => args.execute(&cli).await.map(|_| ()).map_err(anyhow::Error::from),
    };
    listener.abort();

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
