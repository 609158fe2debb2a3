//! Durable import watermark
//!
//! The checkpoint is a small JSON file:
//!
//! ```json
//! {
//!   "lastTimestamp": "2024-01-01T00:00:00",
//!   "lastId": 0
//! }
//! ```
//!
//! Saves go through a temp file in the same directory followed by a rename,
//! so an interrupted write leaves the previous checkpoint intact. On Unix the
//! directory is synced after the rename as well.

use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ImportError, Result};
use rowsync_common::time::{format_timestamp, parse_timestamp};

/// Lookback used when no checkpoint exists yet
pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

/// Import watermark: timestamp and id of the last accepted row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(
        alias = "LastTimestamp",
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub last_timestamp: NaiveDateTime,

    #[serde(alias = "LastId", default)]
    pub last_id: i64,
}

impl Checkpoint {
    pub fn new(last_timestamp: NaiveDateTime, last_id: i64) -> Self {
        Self {
            last_timestamp,
            last_id,
        }
    }

    /// Checkpoint positioned `days` before the current UTC time
    pub fn lookback(days: u32) -> Self {
        Self::new(
            Utc::now().naive_utc() - Duration::days(i64::from(days)),
            0,
        )
    }

    /// Move the watermark to an accepted row.
    ///
    /// Returns `false` and leaves the checkpoint untouched if the row lies
    /// before the current watermark.
    pub fn advance(&mut self, timestamp: NaiveDateTime, id: Option<i64>) -> bool {
        if timestamp < self.last_timestamp {
            warn!(
                row_timestamp = %timestamp,
                checkpoint = %self.last_timestamp,
                "Row is older than the watermark; refusing to move it backwards"
            );
            return false;
        }

        self.last_timestamp = timestamp;
        if let Some(id) = id {
            self.last_id = id;
        }
        true
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::lookback(DEFAULT_LOOKBACK_DAYS)
    }
}

fn serialize_timestamp<S: Serializer>(
    ts: &NaiveDateTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// File-backed checkpoint persistence
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    lookback_days: u32,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint.
    ///
    /// A missing file yields the lookback default. A file that exists but
    /// cannot be read or parsed is an error.
    pub fn load(&self) -> Result<Checkpoint> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let checkpoint = Checkpoint::lookback(self.lookback_days);
                info!(
                    path = %self.path.display(),
                    checkpoint = %checkpoint.last_timestamp,
                    "No checkpoint file, starting from lookback window"
                );
                return Ok(checkpoint);
            },
            Err(source) => {
                return Err(ImportError::CheckpointIo {
                    path: self.path.clone(),
                    action: "read",
                    source,
                })
            },
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&contents).map_err(|source| ImportError::CheckpointFormat {
                path: self.path.clone(),
                source,
            })?;

        debug!(
            path = %self.path.display(),
            checkpoint = %checkpoint.last_timestamp,
            last_id = checkpoint.last_id,
            "Loaded checkpoint"
        );
        Ok(checkpoint)
    }

    /// Persist the checkpoint atomically
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let io_err = |source| ImportError::CheckpointIo {
            path: self.path.clone(),
            action: "written",
            source,
        };

        let json = serde_json::to_string_pretty(checkpoint).map_err(|source| {
            ImportError::CheckpointFormat {
                path: self.path.clone(),
                source,
            }
        })?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        // The rename is only durable once the directory entry is flushed
        #[cfg(unix)]
        std::fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(io_err)?;

        debug!(
            path = %self.path.display(),
            checkpoint = %checkpoint.last_timestamp,
            last_id = checkpoint.last_id,
            "Saved checkpoint"
        );
        Ok(())
    }

    /// Rewind the watermark to `timestamp`, or to the lookback default, with
    /// `lastId` zeroed. The new checkpoint is persisted and returned.
    pub fn reset(&self, timestamp: Option<NaiveDateTime>) -> Result<Checkpoint> {
        let checkpoint = match timestamp {
            Some(ts) => Checkpoint::new(ts, 0),
            None => Checkpoint::lookback(self.lookback_days),
        };
        self.save(&checkpoint)?;

        info!(
            path = %self.path.display(),
            checkpoint = %checkpoint.last_timestamp,
            "Checkpoint reset"
        );
        Ok(checkpoint)
    }
}
