//! CLI error types and their miette conversion.

use miette::Report;
use modgate::{ConfigError, TranslateError};
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Middleware construction or configuration failure
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),
}

/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// Convert a CLI error into a miette report for display.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::Translate(TranslateError::Config(e)) => config_error_to_miette(e),
        CliError::Translate(e) => miette::miette!("{}", e),
        CliError::Server(msg) => miette::miette!(
            "Server error: {}\n\nHint: Try another --port if the address is in use",
            msg
        ),
    }
}

fn config_error_to_miette(err: ConfigError) -> Report {
    match err {
        ConfigError::Load(msg) => miette::miette!(
            "Failed to load configuration: {}\n\nHint: Check modgate.config.json and MODGATE_* variables",
            msg
        ),
        other => miette::miette!("Configuration error: {}", other),
    }
}
