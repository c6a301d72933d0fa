//! CLI error types and conversions

use crate::config::ConfigError;
use crate::downloader::CollectError;
use crate::fetcher::{CredentialError, FetcherError};
use crate::registry::RegistryError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Credential error
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    Fetcher(#[from] FetcherError),

    /// Resume error
    #[error("resume error: {0}")]
    Resume(#[from] ResumeError),

    /// Collection error
    #[error("collection error: {0}")]
    Collect(#[from] CollectError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more validation checks failed
    #[error("validation failed: {0}")]
    Validation(String),
}
