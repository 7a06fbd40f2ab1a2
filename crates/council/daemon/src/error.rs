//! Daemon error types

use council_types::CouncilError;
use thiserror::Error;

/// Errors that stop the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid event on line {line}: {message}")]
    Input { line: usize, message: String },

    #[error("Narrative backend error: {0}")]
    Narrative(String),

    #[error(transparent)]
    Engine(#[from] CouncilError),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
