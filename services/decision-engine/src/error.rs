//! Error taxonomy for the decision engine

use std::path::PathBuf;
use thiserror::Error;

/// Broker call failure. Never escapes the executor: it becomes a blocked outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Broker unreachable: {0}")]
    Connectivity(String),

    #[error("Broker call timed out after {0}ms")]
    Timeout(u64),

    #[error("Broker authentication rejected: {0}")]
    Auth(String),

    #[error("No position for {0}")]
    NoPosition(String),

    #[error("Unexpected broker response: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Only connectivity-class failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Connectivity(_) | BrokerError::Timeout(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, BrokerError::Auth(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::Rejected(_) => "rejected",
            BrokerError::InsufficientFunds { .. } => "insufficient_funds",
            BrokerError::Connectivity(_) => "connectivity",
            BrokerError::Timeout(_) => "timeout",
            BrokerError::Auth(_) => "auth",
            BrokerError::NoPosition(_) => "no_position",
            BrokerError::Protocol(_) => "protocol",
        }
    }
}

/// Persisted state could not be read or written
#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path:?}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome record the learner refuses to apply
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LearnError {
    #[error("Malformed outcome for {symbol}: {reason}")]
    MalformedOutcome { symbol: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
