//! Error types for ledgerlimit.

use thiserror::Error;

/// Main error type for limiter operations.
///
/// Over-quota requests are never errors; they surface as `false` from
/// the admission calls.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Invalid limiter configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Settings could not be loaded from file or environment
    #[error("Settings error: {0}")]
    Settings(#[from] ::config::ConfigError),

    /// Malformed replay input
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
