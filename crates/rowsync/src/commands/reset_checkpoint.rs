//! `--reset-checkpoint [TIMESTAMP]`

use colored::Colorize;

use crate::checkpoint::CheckpointStore;
use crate::config::AppConfig;
use crate::error::Result;
use rowsync_common::time::{format_timestamp, parse_timestamp};

/// Rewind the checkpoint to `timestamp`, or to the lookback default
pub fn run(config: &AppConfig, timestamp: Option<&str>) -> Result<()> {
    let timestamp = timestamp.map(parse_timestamp).transpose()?;

    let store = CheckpointStore::new(&config.import.checkpoint_file)
        .with_lookback_days(config.import.lookback_days);
    let checkpoint = store.reset(timestamp)?;

    println!(
        "{} Checkpoint reset to: {}",
        "✓".green(),
        format_timestamp(&checkpoint.last_timestamp)
    );
    println!("  File: {}", store.path().display());

    Ok(())
}
