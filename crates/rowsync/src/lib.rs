//! rowsync library
//!
//! Incremental, watermark-based import of rows from a relational table into
//! a report server.
//!
//! # Overview
//!
//! - **Checkpoint**: durable `(lastTimestamp, lastId)` watermark ([`checkpoint`])
//! - **Dialects**: per-engine query text and parameter markers ([`dialect`])
//! - **Connections**: sqlx / tiberius drivers behind [`connection::ConnectionFactory`]
//! - **Conversion**: source row to report ([`converter`])
//! - **Submission**: report to server ([`sink`])
//! - **Import**: one bounded batch ([`importer`]), repeated on an interval ([`scheduler`])
//!
//! # Example
//!
//! ```no_run
//! use rowsync::config::AppConfig;
//! use rowsync::commands::run::build_importer;
//!
//! # async fn example() -> rowsync::Result<()> {
//! let config = AppConfig::load(std::path::Path::new("rowsync.toml"))?;
//! let mut importer = build_importer(&config)?;
//! let result = importer.import_batch().await?;
//! println!("imported {} rows", result.imported);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod connection;
pub mod converter;
pub mod dialect;
pub mod error;
pub mod importer;
pub mod scheduler;
pub mod sink;

// Re-export commonly used types
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use error::{ImportError, Result};
pub use importer::{BatchResult, DatabaseImporter};

use clap::Parser;
use std::path::PathBuf;

/// rowsync - incremental database importer
#[derive(Parser, Debug)]
#[command(name = "rowsync")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "With no action flag, runs the scheduled import loop until Ctrl-C.")]
pub struct Cli {
    /// Configuration file (created with defaults if missing)
    #[arg(short, long, env = "ROWSYNC_CONFIG", default_value = config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Rewind the checkpoint to TIMESTAMP (default: 7 days ago) and exit
    #[arg(
        long,
        value_name = "TIMESTAMP",
        num_args = 0..=1,
        conflicts_with_all = ["test_connection", "once"]
    )]
    pub reset_checkpoint: Option<Option<String>>,

    /// Count the rows of the source table and exit (status 1 on failure)
    #[arg(long, conflicts_with = "once")]
    pub test_connection: bool,

    /// Run a single batch and exit
    #[arg(long)]
    pub once: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the CLI reference as Markdown
    #[arg(long, hide = true)]
    pub markdown_help: bool,
}

/// What the process was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run { once: bool },
    ResetCheckpoint(Option<String>),
    TestConnection,
}

impl Cli {
    pub fn action(&self) -> Action {
        if let Some(timestamp) = &self.reset_checkpoint {
            Action::ResetCheckpoint(timestamp.clone())
        } else if self.test_connection {
            Action::TestConnection
        } else {
            Action::Run { once: self.once }
        }
    }
}
