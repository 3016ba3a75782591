//! Error types and result handling for the remedy control plane

use thiserror::Error;

/// Result type alias for remedy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for remedy control-plane operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Check if the error is expected to clear on its own by the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Probe(_) | Error::Store(_) | Error::Timeout(_))
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Probe(_) => "probe",
            Error::Store(_) => "store",
            Error::Runtime(_) => "runtime",
            Error::NotFound(_) => "not_found",
            Error::Notification(_) => "notification",
            Error::Timeout(_) => "timeout",
            Error::Serialization(_) => "serialization",
            Error::Generic(_) => "generic",
        }
    }
}
