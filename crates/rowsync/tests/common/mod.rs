//! In-memory fakes for importer tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use rowsync::checkpoint::CheckpointStore;
use rowsync::config::{AdvancePolicy, SourceConfig};
use rowsync::connection::{ConnectionFactory, SourceConnection};
use rowsync::converter::RowConverter;
use rowsync::dialect::{Engine, IncrementalQuery};
use rowsync::error::{ConversionError, ImportError, SubmissionError};
use rowsync::sink::ReportSink;
use rowsync::DatabaseImporter;
use rowsync_common::time::parse_timestamp;
use rowsync_common::{SourceRow, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub fn base_time() -> NaiveDateTime {
    parse_timestamp("2024-01-01T00:00:00").unwrap()
}

/// Timestamp of row `id`: one minute apart, starting a minute after `base_time`
pub fn row_time(id: i64) -> NaiveDateTime {
    base_time() + Duration::minutes(id)
}

pub fn make_row(id: i64) -> SourceRow {
    SourceRow::from_pairs([
        ("id", Value::Int(id)),
        ("start_datetime", Value::Timestamp(row_time(id))),
        ("serial_number", Value::from(format!("SN-{:04}", id))),
    ])
}

pub fn source_config(batch_size: u32) -> SourceConfig {
    SourceConfig {
        engine: Engine::PostgreSql,
        connection_string: "postgres://fake".to_string(),
        table: "test_results".to_string(),
        timestamp_column: "start_datetime".to_string(),
        id_column: Some("id".to_string()),
        id_tie_break: false,
        batch_size,
        connect_timeout: std::time::Duration::from_secs(1),
    }
}

/// Source table shared between the test and the fake connections
#[derive(Clone, Default)]
pub struct FakeTable {
    rows: Arc<Mutex<Vec<SourceRow>>>,
    fetch_sizes: Arc<Mutex<Vec<usize>>>,
    fail_connect: Arc<Mutex<bool>>,
    closed: Arc<Mutex<usize>>,
}

impl FakeTable {
    pub fn with_rows(ids: impl IntoIterator<Item = i64>) -> Self {
        let table = Self::default();
        table.insert(ids);
        table
    }

    pub fn insert(&self, ids: impl IntoIterator<Item = i64>) {
        let mut rows = self.rows.lock().unwrap();
        rows.extend(ids.into_iter().map(make_row));
    }

    pub fn push_row(&self, row: SourceRow) {
        self.rows.lock().unwrap().push(row);
    }

    pub fn fetch_sizes(&self) -> Vec<usize> {
        self.fetch_sizes.lock().unwrap().clone()
    }

    pub fn closed_connections(&self) -> usize {
        *self.closed.lock().unwrap()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        *self.fail_connect.lock().unwrap() = fail;
    }
}

pub struct FakeFactory {
    pub source: SourceConfig,
    pub table: FakeTable,
}

#[async_trait]
impl ConnectionFactory for FakeFactory {
    fn source(&self) -> &SourceConfig {
        &self.source
    }

    async fn create_connection(&self) -> rowsync::Result<Box<dyn SourceConnection>> {
        if *self.table.fail_connect.lock().unwrap() {
            return Err(ImportError::connection("connection refused"));
        }
        Ok(Box::new(FakeConnection {
            table: self.table.clone(),
            timestamp_column: self.source.timestamp_column.clone(),
        }))
    }
}

struct FakeConnection {
    table: FakeTable,
    timestamp_column: String,
}

#[async_trait]
impl SourceConnection for FakeConnection {
    /// Evaluates `WHERE ts > :lastTime ORDER BY ts ASC LIMIT :batchSize`
    async fn fetch_rows(&mut self, query: &IncrementalQuery) -> rowsync::Result<Vec<SourceRow>> {
        let last_time = query.last_time().unwrap();
        let limit = query.batch_size().unwrap() as usize;

        let ts = |row: &SourceRow| {
            row.get(&self.timestamp_column)
                .and_then(Value::as_timestamp)
        };

        let mut rows: Vec<SourceRow> = self
            .table
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| ts(*row).map_or(true, |t| t > last_time))
            .cloned()
            .collect();
        rows.sort_by_key(|row| ts(row));
        rows.truncate(limit);

        self.table.fetch_sizes.lock().unwrap().push(rows.len());
        Ok(rows)
    }

    async fn fetch_count(&mut self, _sql: &str) -> rowsync::Result<i64> {
        Ok(self.table.rows.lock().unwrap().len() as i64)
    }

    async fn close(self: Box<Self>) -> rowsync::Result<()> {
        *self.table.closed.lock().unwrap() += 1;
        Ok(())
    }
}

/// Report produced by [`FakeConverter`]: just the row id
#[derive(Debug, Clone, PartialEq)]
pub struct FakeReport(pub i64);

/// Converts rows to their id, failing for ids in `fail_ids`
#[derive(Clone, Default)]
pub struct FakeConverter {
    pub fail_ids: Arc<Mutex<HashSet<i64>>>,
}

impl FakeConverter {
    pub fn failing(ids: impl IntoIterator<Item = i64>) -> Self {
        let converter = Self::default();
        converter.fail_ids.lock().unwrap().extend(ids);
        converter
    }

    pub fn heal(&self) {
        self.fail_ids.lock().unwrap().clear();
    }
}

impl RowConverter for FakeConverter {
    type Report = FakeReport;

    fn convert(&self, row: &SourceRow) -> Result<FakeReport, ConversionError> {
        let id = row
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ConversionError::missing_column("id"))?;
        if self.fail_ids.lock().unwrap().contains(&id) {
            return Err(ConversionError::new(format!("row {} is malformed", id)));
        }
        Ok(FakeReport(id))
    }
}

/// Records submitted ids, rejecting ids in `reject_ids`
#[derive(Clone, Default)]
pub struct FakeSink {
    pub submitted: Arc<Mutex<Vec<i64>>>,
    pub reject_ids: Arc<Mutex<HashSet<i64>>>,
}

impl FakeSink {
    pub fn rejecting(ids: impl IntoIterator<Item = i64>) -> Self {
        let sink = Self::default();
        sink.reject_ids.lock().unwrap().extend(ids);
        sink
    }

    pub fn submitted(&self) -> Vec<i64> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink<FakeReport> for FakeSink {
    async fn submit(&self, report: FakeReport) -> Result<(), SubmissionError> {
        if self.reject_ids.lock().unwrap().contains(&report.0) {
            return Err(SubmissionError::with_status("rejected", 500));
        }
        self.submitted.lock().unwrap().push(report.0);
        Ok(())
    }
}

pub type FakeImporter = DatabaseImporter<FakeFactory, FakeConverter, FakeSink>;

/// Checkpoint store positioned just before the first fake row
pub fn store_at_base(path: &Path) -> CheckpointStore {
    let store = CheckpointStore::new(path);
    store.reset(Some(base_time())).unwrap();
    store
}

pub fn importer(
    table: &FakeTable,
    batch_size: u32,
    converter: FakeConverter,
    sink: FakeSink,
    store: CheckpointStore,
    policy: AdvancePolicy,
) -> FakeImporter {
    let factory = FakeFactory {
        source: source_config(batch_size),
        table: table.clone(),
    };
    DatabaseImporter::new(factory, converter, sink, store, policy).unwrap()
}
