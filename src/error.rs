//! Error types for the offline proxy

use thiserror::Error;

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Error types that can occur while intercepting requests
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Origin server returned 5xx error: {status} - {message}")]
    ServerFailure { status: u16, message: String },

    #[error("Origin server returned 4xx error: {status} - {message}")]
    ClientFailure { status: u16, message: String },

    #[error("Storage error: {0}")]
    StorageFailure(String),

    #[error("State inconsistency for {url}: {detail}")]
    StateInconsistency { url: String, detail: String },

    #[error("Unsatisfiable range: {0}")]
    UnsatisfiableRange(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for ProxyError {
    fn from(err: bincode::Error) -> Self {
        ProxyError::SerializationError(err.to_string())
    }
}

impl ProxyError {
    /// Convert error to the HTTP status code returned to the client
    pub fn to_http_status(&self) -> u16 {
        match self {
            // Client errors from origin are surfaced as-is
            ProxyError::ClientFailure { status, .. } => *status,

            ProxyError::ServerFailure { .. } => 502,
            ProxyError::TransportFailure(_) => 502,

            ProxyError::UnsatisfiableRange(_) => 416,
            ProxyError::ParseError(_) => 400,

            ProxyError::StateInconsistency { .. } => 500,
            ProxyError::StorageFailure(_) => 500,
            ProxyError::ConfigError(_) => 500,
            ProxyError::SerializationError(_) => 500,
            ProxyError::IoError(_) => 500,
            ProxyError::InternalError(_) => 500,
        }
    }

    /// Create an error from an HTTP status code
    ///
    /// Automatically categorizes as 4xx or 5xx error
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (400..500).contains(&status) {
            ProxyError::ClientFailure { status, message }
        } else if (500..600).contains(&status) {
            ProxyError::ServerFailure { status, message }
        } else {
            ProxyError::TransportFailure(format!("HTTP {}: {}", status, message))
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        ProxyError::StorageFailure(message.into())
    }
}
