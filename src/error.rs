//! Error types for Eventgate.

use thiserror::Error;

use crate::throttle::ThrottleError;

/// Main error type for Eventgate operations.
#[derive(Error, Debug)]
pub enum EventgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Throttle construction errors
    #[error("Throttle error: {0}")]
    Throttle(#[from] ThrottleError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for EventgateError {
    fn from(err: ::config::ConfigError) -> Self {
        EventgateError::Config(err.to_string())
    }
}

/// Result type alias for Eventgate operations.
pub type Result<T> = std::result::Result<T, EventgateError>;
