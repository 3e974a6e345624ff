//! Error types for keygate

/// Result type for keygate operations
pub type Result<T> = std::result::Result<T, KeygateError>;

/// Keygate-specific errors
#[derive(Debug, thiserror::Error)]
pub enum KeygateError {
    /// Missing or invalid input fields (caller's fault, never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown agent or challenge id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate public key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Challenge or token past its expiry
    #[error("Expired: {0}")]
    Expired(String),

    /// Cryptographic signature verification failed
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Malformed configuration (fails fast at startup)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal failure, reported without implementation detail
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeygateError {
    /// Get HTTP status code for this error
    ///
    /// Transport adapters translate error kinds to their own status codes;
    /// this mapping is the reference one.
    pub fn status_code(&self) -> u16 {
        match self {
            KeygateError::Validation(_) => 400,
            KeygateError::NotFound(_) => 404,
            KeygateError::Conflict(_) => 409,
            KeygateError::Expired(_) => 410,
            KeygateError::Signature(_) => 400,
            KeygateError::Configuration(_) => 500,
            KeygateError::Internal(_) => 500,
        }
    }
}

// Conversions from common error types
impl From<anyhow::Error> for KeygateError {
    fn from(err: anyhow::Error) -> Self {
        KeygateError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for KeygateError {
    fn from(err: serde_json::Error) -> Self {
        KeygateError::Internal(format!("JSON error: {}", err))
    }
}
