//! Error types shared by the rowsync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid timestamp '{input}': expected ISO-8601 (e.g. 2024-01-01T00:00:00)")]
    InvalidTimestamp { input: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}
