//! Layered error definitions
//!
//! Categorized by source: config / connectivity / setup / teardown / acknowledgment

use std::fmt;

use thiserror::Error;

/// Broker operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerOp {
    Dial,
    OpenChannel,
    DeclareQueue,
    BindQueue,
    Consume,
    Cancel,
    CloseChannel,
    CloseConnection,
    Ack,
    Reject,
}

impl fmt::Display for BrokerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dial => "dial",
            Self::OpenChannel => "open channel",
            Self::DeclareQueue => "declare queue",
            Self::BindQueue => "bind queue",
            Self::Consume => "consume",
            Self::Cancel => "cancel consumer",
            Self::CloseChannel => "close channel",
            Self::CloseConnection => "close connection",
            Self::Ack => "ack",
            Self::Reject => "reject",
        };
        f.write_str(name)
    }
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Broker Errors =====
    /// Dial or channel-open failure
    #[error("broker connectivity error during {op}: {message}")]
    Connectivity { op: BrokerOp, message: String },

    /// Queue declare / bind / consume failure
    #[error("broker setup error during {op}: {message}")]
    Setup { op: BrokerOp, message: String },

    /// Failure while cancelling or closing during intentional teardown
    #[error("teardown error during {op}: {message}")]
    ShutdownRace { op: BrokerOp, message: String },

    /// Ack or reject could not be delivered to the broker
    #[error("acknowledgment error during {op}: {message}")]
    Acknowledge { op: BrokerOp, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create connectivity error
    pub fn connectivity(op: BrokerOp, message: impl Into<String>) -> Self {
        Self::Connectivity {
            op,
            message: message.into(),
        }
    }

    /// Create setup error
    pub fn setup(op: BrokerOp, message: impl Into<String>) -> Self {
        Self::Setup {
            op,
            message: message.into(),
        }
    }

    /// Create teardown error
    pub fn shutdown_race(op: BrokerOp, message: impl Into<String>) -> Self {
        Self::ShutdownRace {
            op,
            message: message.into(),
        }
    }

    /// Create acknowledgment error
    pub fn acknowledge(op: BrokerOp, message: impl Into<String>) -> Self {
        Self::Acknowledge {
            op,
            message: message.into(),
        }
    }

    /// Whether the reconnect loop retries after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. } | Self::Setup { .. })
    }

    /// Whether this error came from intentional teardown
    pub fn is_shutdown_race(&self) -> bool {
        matches!(self, Self::ShutdownRace { .. })
    }

    /// Broker operation that failed, if any
    pub fn op(&self) -> Option<BrokerOp> {
        match self {
            Self::Connectivity { op, .. }
            | Self::Setup { op, .. }
            | Self::ShutdownRace { op, .. }
            | Self::Acknowledge { op, .. } => Some(*op),
            _ => None,
        }
    }
}
