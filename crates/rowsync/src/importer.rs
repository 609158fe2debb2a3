//! Incremental batch import
//!
//! One call to [`DatabaseImporter::import_batch`]:
//!
//! 1. builds the incremental query from the in-memory watermark
//! 2. opens a connection, fetches at most `batch_size` rows and closes it
//! 3. converts and submits each row in ascending timestamp order; a failed
//!    row is recorded and the batch moves on
//! 4. advances the watermark for accepted rows, according to the
//!    [`AdvancePolicy`]
//! 5. persists the watermark, even when rows failed or none were fetched
//!
//! Row-level failures never escape; they are returned in the
//! [`BatchResult`]. Connection, query and checkpoint failures are returned as
//! [`ImportError`]s and leave the persisted watermark untouched.

use chrono::NaiveDateTime;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::AdvancePolicy;
use crate::connection::ConnectionFactory;
use crate::converter::RowConverter;
use crate::dialect::IncrementalQuery;
use crate::error::{ConversionError, ImportError, Result, RowError};
use crate::sink::ReportSink;
use rowsync_common::{SourceRow, Value};

/// A row that failed conversion or submission
#[derive(Debug, Clone, PartialEq)]
pub struct RowFailure {
    /// Zero-based position in the fetched batch
    pub position: usize,
    pub row_id: Option<i64>,
    pub timestamp: Option<NaiveDateTime>,
    pub error: RowError,
}

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Rows returned by the source query
    pub fetched: usize,
    /// Rows converted and accepted by the sink
    pub imported: usize,
    pub failures: Vec<RowFailure>,
    /// Accepted rows the watermark could not move past because an earlier
    /// row in the batch failed; they will be fetched again next batch
    pub behind_watermark: usize,
    /// Rows left unprocessed because the batch was cancelled
    pub unreached: usize,
    pub cancelled: bool,
    /// Watermark persisted at the end of the batch
    pub checkpoint: Checkpoint,
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetched == 0
    }
}

/// Orders, bounds and tracks the import of source rows into the report sink
pub struct DatabaseImporter<F, C, S> {
    factory: F,
    converter: C,
    sink: S,
    store: CheckpointStore,
    policy: AdvancePolicy,
    checkpoint: Checkpoint,
}

impl<F, C, S> DatabaseImporter<F, C, S>
where
    F: ConnectionFactory,
    C: RowConverter,
    S: ReportSink<C::Report>,
{
    /// Create an importer, loading the watermark from `store`
    pub fn new(
        factory: F,
        converter: C,
        sink: S,
        store: CheckpointStore,
        policy: AdvancePolicy,
    ) -> Result<Self> {
        let checkpoint = store.load()?;
        info!(
            checkpoint = %checkpoint.last_timestamp,
            last_id = checkpoint.last_id,
            policy = ?policy,
            "Importer ready"
        );

        Ok(Self {
            factory,
            converter,
            sink,
            store,
            policy,
            checkpoint,
        })
    }

    /// Current in-memory watermark
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub async fn import_batch(&mut self) -> Result<BatchResult> {
        self.import_batch_until_cancelled(&CancellationToken::new())
            .await
    }

    /// Run one batch, stopping between rows once `cancel` fires. Work done
    /// before cancellation is still persisted.
    pub async fn import_batch_until_cancelled(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        let started = Instant::now();
        let source = self.factory.source();
        let batch_size = source.batch_size;
        let engine = source.engine;

        let query = self.factory.build_incremental_query(&self.checkpoint)?;
        debug!(
            %engine,
            batch_size,
            checkpoint = %self.checkpoint.last_timestamp,
            "Starting batch"
        );

        let rows = self.fetch(&query).await?;
        let fetched = rows.len();

        let mut imported = 0;
        let mut failures = Vec::new();
        let mut behind_watermark = 0;
        let mut unreached = 0;
        let mut cancelled = false;
        let mut blocked = false;

        for (position, row) in rows.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                unreached = fetched - position;
                warn!(unreached, "Batch cancelled, remaining rows left for the next run");
                break;
            }

            let row_id = self.row_id(row);
            let timestamp = self.row_timestamp(row);

            match self.process_row(row, timestamp, row_id).await {
                Ok(ts) => {
                    imported += 1;
                    if blocked {
                        behind_watermark += 1;
                    } else {
                        self.checkpoint.advance(ts, row_id);
                    }
                },
                Err(err) => {
                    warn!(
                        position,
                        row_id = ?row_id,
                        timestamp = ?timestamp,
                        error = %err,
                        "Row failed, continuing with the next row"
                    );
                    failures.push(RowFailure {
                        position,
                        row_id,
                        timestamp,
                        error: err,
                    });
                    if self.policy == AdvancePolicy::Contiguous {
                        blocked = true;
                    }
                },
            }
        }

        if let Err(e) = self.store.save(&self.checkpoint) {
            error!(
                error = %e,
                checkpoint = %self.checkpoint.last_timestamp,
                "Failed to save checkpoint, watermark not persisted"
            );
            return Err(e);
        }

        let result = BatchResult {
            fetched,
            imported,
            failures,
            behind_watermark,
            unreached,
            cancelled,
            checkpoint: self.checkpoint,
            elapsed: started.elapsed(),
        };

        info!(
            fetched = result.fetched,
            imported = result.imported,
            failed = result.failed(),
            behind_watermark = result.behind_watermark,
            checkpoint = %result.checkpoint.last_timestamp,
            last_id = result.checkpoint.last_id,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Batch complete"
        );

        Ok(result)
    }

    /// Open a connection, run the query and release the connection again on
    /// every path.
    async fn fetch(&self, query: &IncrementalQuery) -> Result<Vec<SourceRow>> {
        let mut conn = self.factory.create_connection().await?;
        let rows = conn.fetch_rows(query).await;

        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close source connection");
        }

        rows
    }

    async fn process_row(
        &self,
        row: &SourceRow,
        timestamp: Option<NaiveDateTime>,
        row_id: Option<i64>,
    ) -> std::result::Result<NaiveDateTime, RowError> {
        let source = self.factory.source();

        let timestamp = timestamp.ok_or_else(|| {
            ConversionError::new(format!(
                "column '{}' is missing or not a timestamp",
                source.timestamp_column
            ))
        })?;

        if let Some(column) = &source.id_column {
            if row_id.is_none() {
                return Err(ConversionError::new(format!(
                    "id column '{}' is missing or not an integer",
                    column
                ))
                .into());
            }
        }

        let report = self.converter.convert(row)?;
        self.sink.submit(report).await?;

        debug!(row_id = ?row_id, %timestamp, "Row imported");
        Ok(timestamp)
    }

    fn row_timestamp(&self, row: &SourceRow) -> Option<NaiveDateTime> {
        row.get(&self.factory.source().timestamp_column)
            .and_then(Value::as_timestamp)
    }

    fn row_id(&self, row: &SourceRow) -> Option<i64> {
        self.factory
            .source()
            .id_column
            .as_ref()
            .and_then(|c| row.get(c))
            .and_then(Value::as_i64)
    }
}

/// Short operator hint for a batch-level failure
pub fn describe_failure(err: &ImportError) -> &'static str {
    if err.is_checkpoint_failure() {
        "checkpoint could not be persisted; rows from this batch may be imported again"
    } else if err.is_retriable() {
        "will retry on the next scheduled run"
    } else {
        "fix the configuration and restart"
    }
}
