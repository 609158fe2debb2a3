//! Fixed-interval import loop
//!
//! Runs one batch, sleeps for the poll interval, repeats. Batches never
//! overlap and a failed batch never ends the loop; only cancellation does.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection::ConnectionFactory;
use crate::converter::RowConverter;
use crate::error::ImportError;
use crate::importer::{describe_failure, BatchResult, DatabaseImporter};
use crate::sink::ReportSink;

/// What a single scheduler tick produced
#[derive(Debug)]
pub enum TickOutcome {
    Completed(BatchResult),
    Failed(ImportError),
}

pub struct Scheduler<F, C, S> {
    importer: DatabaseImporter<F, C, S>,
    interval: Duration,
    shutdown: CancellationToken,
    consecutive_failures: u32,
}

impl<F, C, S> Scheduler<F, C, S>
where
    F: ConnectionFactory,
    C: RowConverter,
    S: ReportSink<C::Report>,
{
    pub fn new(
        importer: DatabaseImporter<F, C, S>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            importer,
            interval,
            shutdown,
            consecutive_failures: 0,
        }
    }

    pub fn importer(&self) -> &DatabaseImporter<F, C, S> {
        &self.importer
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one batch and log its outcome
    pub async fn tick(&mut self) -> TickOutcome {
        match self
            .importer
            .import_batch_until_cancelled(&self.shutdown)
            .await
        {
            Ok(result) => {
                self.consecutive_failures = 0;
                if result.failed() > 0 {
                    warn!(
                        imported = result.imported,
                        failed = result.failed(),
                        behind_watermark = result.behind_watermark,
                        "Batch finished with failed rows"
                    );
                }
                TickOutcome::Completed(result)
            },
            Err(err) => {
                self.consecutive_failures += 1;
                error!(
                    error = %err,
                    retriable = err.is_retriable(),
                    consecutive_failures = self.consecutive_failures,
                    hint = describe_failure(&err),
                    "Import batch failed"
                );
                TickOutcome::Failed(err)
            },
        }
    }

    /// Loop until the shutdown token is cancelled
    pub async fn run(&mut self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Scheduler started"
        );

        loop {
            self.tick().await;

            if self.shutdown.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = self.shutdown.cancelled() => break,
            }
        }

        info!(
            checkpoint = %self.importer.checkpoint().last_timestamp,
            "Scheduler stopped"
        );
    }
}
