//! Error types for the platform limiter.
//!
//! Admission outcomes (denied, wait timeout, unconfigured platform) are plain
//! return values on the engine. The variants here cover failures of the
//! surrounding machinery: configuration, the window store, and the RPC layer.

use thiserror::Error;

/// Main error type for platform limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The shared window store could not be read or written
    #[error("Window store unavailable: {0}")]
    Store(String),

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

/// Result type alias for platform limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
