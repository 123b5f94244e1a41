//! Error types for CLI operations.

use consumer::ConsumerError;
use contracts::ContractError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded or is invalid
    #[error("Invalid configuration in {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: ContractError,
    },

    /// Consumer could not be started
    #[error("Failed to start consumer on queue '{queue}': {source}")]
    Start {
        queue: String,
        #[source]
        source: ConsumerError,
    },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn config(path: impl Into<String>, source: ContractError) -> Self {
        Self::Config {
            path: path.into(),
            source,
        }
    }

    pub fn start(queue: impl Into<String>, source: ConsumerError) -> Self {
        Self::Start {
            queue: queue.into(),
            source,
        }
    }
}
