//! Error types for the importer
//!
//! Two tiers:
//! - [`ImportError`]: batch-level failures that escape `import_batch` and
//!   reach the scheduler (connection, query, checkpoint persistence, config).
//! - [`RowError`]: row-scoped failures ([`ConversionError`], [`SubmissionError`])
//!   that are recorded in the batch result and never propagated.

use std::path::PathBuf;
use thiserror::Error;

use crate::dialect::Engine;

/// Result type alias for importer operations
pub type Result<T> = std::result::Result<T, ImportError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Batch-level error taxonomy
#[derive(Error, Debug)]
pub enum ImportError {
    /// Engine name in the configuration is not one of the supported set
    #[error("Database engine '{0}' not supported. Expected one of: sqlserver, mysql, postgresql, oracle, sqlite.")]
    UnsupportedEngine(String),

    /// Engine is recognised but this build carries no driver for it
    #[error("No {0} driver is bundled in this build. Queries can be generated for it but not executed.")]
    DriverUnavailable(Engine),

    /// Opening or authenticating the source connection failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The incremental query (or the connection test query) failed
    #[error("Query failed: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Checkpoint file could not be read or written
    #[error("Checkpoint file '{}' could not be {action}: {source}", .path.display())]
    CheckpointIo {
        path: PathBuf,
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint file exists but does not hold a valid watermark
    #[error("Checkpoint file '{}' is malformed: {source}. Fix or remove it, or run --reset-checkpoint.", .path.display())]
    CheckpointFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// A table or column name is not a plain SQL identifier
    #[error("Invalid SQL identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error(transparent)]
    Common(#[from] rowsync_common::CommonError),
}

impl ImportError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn connection_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn query_with(
        message: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn invalid_identifier(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    /// Whether the next scheduled tick may succeed without operator action
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Query { .. } | Self::CheckpointIo { .. }
        )
    }

    /// Whether this error means watermark progress was not persisted
    pub fn is_checkpoint_failure(&self) -> bool {
        matches!(self, Self::CheckpointIo { .. } | Self::CheckpointFormat { .. })
    }
}

/// A row could not be turned into a report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn missing_column(column: &str) -> Self {
        Self::new(format!("required column '{}' is missing or NULL", column))
    }
}

/// The report sink rejected a report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SubmissionError {
    pub message: String,
    /// HTTP-style status code when the sink has one
    pub status: Option<u16>,
}

impl SubmissionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// Row-scoped failure, aggregated into the batch result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("submission failed: {0}")]
    Submission(#[from] SubmissionError),
}
