//! Error types for the delay guard

use thiserror::Error;

use crate::guard::{GuardError, ParseError, SinkError, StoreError};

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the delay guard
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(#[from] ParseError),

    // Guard outcomes
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is an expected, retryable guard outcome
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Guard(e) if e.is_retryable())
    }

    /// Check if this error is an authorization failure
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Guard(GuardError::Unauthorized(_)))
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{Address, Fingerprint, Unauthorized};

    #[test]
    fn test_retryable_passthrough() {
        let queued: Error = GuardError::Queued {
            fingerprint: Fingerprint::from_bytes([0u8; 32]),
            ready_at: 10,
        }
        .into();
        assert!(queued.is_retryable());
        assert!(!queued.is_unauthorized());

        let denied: Error = GuardError::from(Unauthorized {
            caller: Address::ZERO,
        })
        .into();
        assert!(denied.is_unauthorized());
        assert!(!denied.is_retryable());

        assert!(!Error::Config("x".to_string()).is_retryable());
    }
}
