//! Consumer error types

use contracts::ContractError;
use thiserror::Error;

/// Facade errors
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The initial connect made by `start` failed
    #[error("initial connect failed: {0}")]
    Connect(#[from] ContractError),

    /// `start` was called on a running consumer
    #[error("consumer already started")]
    AlreadyStarted,

    /// `start` was called after `stop`
    #[error("consumer stopped")]
    Stopped,
}

impl ConsumerError {
    /// Underlying broker error, if any
    pub fn broker_error(&self) -> Option<&ContractError> {
        match self {
            Self::Connect(e) => Some(e),
            _ => None,
        }
    }
}
