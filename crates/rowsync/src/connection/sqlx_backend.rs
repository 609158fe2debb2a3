//! PostgreSQL, MySQL and SQLite sources on top of `sqlx`
//!
//! Each source holds a single connection (no pool): a batch opens one,
//! runs one query and closes it.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::mysql::{MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::types::{BigDecimal, JsonValue, Uuid};
use sqlx::{Column, Connection, Row, ValueRef};
use tracing::debug;

use super::SourceConnection;
use crate::dialect::{BindStyle, IncrementalQuery};
use crate::error::{ImportError, Result};
use rowsync_common::{SourceRow, Value};

/// Bind dynamic values onto a `sqlx::query`, in order
macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(b),
                Value::Int(n) => query.bind(n),
                Value::Float(f) => query.bind(f),
                Value::Timestamp(ts) => query.bind(ts),
                Value::Text(s) => query.bind(s),
                Value::Bytes(b) => query.bind(b),
            };
        }
        query
    }};
}

/// Return the first type the column decodes as
macro_rules! probe {
    ($row:expr, $idx:expr, $( $ty:ty => $conv:expr ),+ $(,)?) => {{
        $(
            if let Ok(v) = $row.try_get::<$ty, _>($idx) {
                return ($conv)(v);
            }
        )+
    }};
}

/// Defines a single-connection source for one sqlx driver
macro_rules! sqlx_source {
    ($name:ident, $conn:ty, $engine:literal, $bind:expr, $decode:ident) => {
        #[doc = concat!("Single ", $engine, " connection")]
        pub struct $name {
            conn: $conn,
        }

        impl $name {
            pub async fn connect(url: &str) -> Result<Self> {
                let conn = <$conn>::connect(url).await.map_err(|e| {
                    ImportError::connection_with(concat!("failed to connect to ", $engine), e)
                })?;
                Ok(Self { conn })
            }
        }

        #[async_trait]
        impl SourceConnection for $name {
            async fn fetch_rows(&mut self, query: &IncrementalQuery) -> Result<Vec<SourceRow>> {
                let native = query.to_native($bind);
                debug!(sql = %native.sql, params = native.values.len(), "Executing incremental query");

                let rows = bind_values!(sqlx::query(&native.sql), native.values.clone())
                    .fetch_all(&mut self.conn)
                    .await
                    .map_err(|e| {
                        ImportError::query_with("incremental query failed", native.sql.clone(), e)
                    })?;

                Ok(rows.iter().map($decode).collect())
            }

            async fn fetch_count(&mut self, sql: &str) -> Result<i64> {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(&mut self.conn)
                    .await
                    .map_err(|e| ImportError::query_with("count query failed", sql, e))
            }

            async fn close(self: Box<Self>) -> Result<()> {
                self.conn.close().await.map_err(|e| {
                    ImportError::connection_with(concat!("failed to close ", $engine, " connection"), e)
                })
            }
        }
    };
}

sqlx_source!(PgSource, PgConnection, "postgresql", BindStyle::Dollar, decode_pg_row);
sqlx_source!(MySqlSource, MySqlConnection, "mysql", BindStyle::Question, decode_mysql_row);
sqlx_source!(SqliteSource, SqliteConnection, "sqlite", BindStyle::Question, decode_sqlite_row);

fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn is_null<R: Row>(row: &R, idx: usize) -> bool
where
    usize: sqlx::ColumnIndex<R>,
{
    row.try_get_raw(idx).map(|raw| raw.is_null()).unwrap_or(true)
}

fn decode_pg_row(row: &PgRow) -> SourceRow {
    let values = (0..row.len()).map(|idx| decode_pg_value(row, idx)).collect();
    SourceRow::new(column_names(row), values)
}

fn decode_pg_value(row: &PgRow, idx: usize) -> Value {
    if is_null(row, idx) {
        return Value::Null;
    }
    probe!(row, idx,
        bool => Value::Bool,
        i16 => |v: i16| Value::Int(v.into()),
        i32 => |v: i32| Value::Int(v.into()),
        i64 => Value::Int,
        f32 => |v: f32| Value::Float(v.into()),
        f64 => Value::Float,
        NaiveDateTime => Value::Timestamp,
        DateTime<Utc> => |v: DateTime<Utc>| Value::Timestamp(v.naive_utc()),
        NaiveDate => date_value,
        BigDecimal => |v: BigDecimal| Value::Text(v.to_string()),
        Uuid => |v: Uuid| Value::Text(v.to_string()),
        JsonValue => |v: JsonValue| Value::Text(v.to_string()),
        String => Value::Text,
        Vec<u8> => Value::Bytes,
    );
    Value::Null
}

fn decode_mysql_row(row: &MySqlRow) -> SourceRow {
    let values = (0..row.len())
        .map(|idx| decode_mysql_value(row, idx))
        .collect();
    SourceRow::new(column_names(row), values)
}

fn decode_mysql_value(row: &MySqlRow, idx: usize) -> Value {
    if is_null(row, idx) {
        return Value::Null;
    }
    probe!(row, idx,
        bool => Value::Bool,
        i8 => |v: i8| Value::Int(v.into()),
        i16 => |v: i16| Value::Int(v.into()),
        i32 => |v: i32| Value::Int(v.into()),
        i64 => Value::Int,
        u64 => |v: u64| i64::try_from(v).map(Value::Int).unwrap_or_else(|_| Value::Text(v.to_string())),
        f32 => |v: f32| Value::Float(v.into()),
        f64 => Value::Float,
        NaiveDateTime => Value::Timestamp,
        DateTime<Utc> => |v: DateTime<Utc>| Value::Timestamp(v.naive_utc()),
        NaiveDate => date_value,
        BigDecimal => |v: BigDecimal| Value::Text(v.to_string()),
        String => Value::Text,
        Vec<u8> => Value::Bytes,
    );
    Value::Null
}

fn decode_sqlite_row(row: &SqliteRow) -> SourceRow {
    let values = (0..row.len())
        .map(|idx| decode_sqlite_value(row, idx))
        .collect();
    SourceRow::new(column_names(row), values)
}

fn decode_sqlite_value(row: &SqliteRow, idx: usize) -> Value {
    if is_null(row, idx) {
        return Value::Null;
    }
    // SQLite is dynamically typed; timestamps usually come back as TEXT and
    // are parsed on demand by `Value::as_timestamp`.
    probe!(row, idx,
        i64 => Value::Int,
        f64 => Value::Float,
        String => Value::Text,
        Vec<u8> => Value::Bytes,
    );
    Value::Null
}

fn date_value(date: NaiveDate) -> Value {
    date.and_hms_opt(0, 0, 0)
        .map(Value::Timestamp)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::config::SourceConfig;
    use crate::dialect::{build_incremental_query, Engine};
    use rowsync_common::time::parse_timestamp;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn seeded_db(dir: &TempDir) -> String {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("source.db").display());
        let mut conn = SqliteConnection::connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE test_results (
                id INTEGER PRIMARY KEY,
                start_datetime TEXT NOT NULL,
                serial_number TEXT,
                measurement REAL,
                raw BLOB
            )",
        )
        .execute(&mut conn)
        .await
        .unwrap();

        for i in 1..=5 {
            sqlx::query(
                "INSERT INTO test_results (id, start_datetime, serial_number, measurement, raw) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(i as i64)
            .bind(format!("2024-01-0{} 08:00:00", i))
            .bind(if i == 3 { None } else { Some(format!("SN-{}", i)) })
            .bind(i as f64 * 1.5)
            .bind(vec![i as u8])
            .execute(&mut conn)
            .await
            .unwrap();
        }
        conn.close().await.unwrap();
        url
    }

    fn source(url: &str, batch_size: u32) -> SourceConfig {
        SourceConfig {
            engine: Engine::Sqlite,
            connection_string: url.to_string(),
            table: "test_results".to_string(),
            timestamp_column: "start_datetime".to_string(),
            id_column: Some("id".to_string()),
            id_tie_break: false,
            batch_size,
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_sqlite_fetch_respects_watermark_and_limit() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(&dir).await;

        let checkpoint = Checkpoint::new(parse_timestamp("2024-01-02 08:00:00").unwrap(), 2);
        let query = build_incremental_query(&source(&url, 2), &checkpoint).unwrap();

        let mut conn = Box::new(SqliteSource::connect(&url).await.unwrap());
        let rows = conn.fetch_rows(&query).await.unwrap();
        conn.close().await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(3)));
        assert_eq!(rows[1].get("id"), Some(&Value::Int(4)));
    }

    #[tokio::test]
    async fn test_sqlite_decodes_dynamic_values() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(&dir).await;

        let checkpoint = Checkpoint::new(parse_timestamp("2024-01-01").unwrap(), 0);
        let query = build_incremental_query(&source(&url, 10), &checkpoint).unwrap();

        let mut conn = SqliteSource::connect(&url).await.unwrap();
        let rows = conn.fetch_rows(&query).await.unwrap();

        assert_eq!(rows.len(), 5);
        let third = &rows[2];
        assert_eq!(third.get("serial_number"), Some(&Value::Null));
        assert_eq!(third.get("measurement"), Some(&Value::Float(4.5)));
        assert_eq!(third.get("raw"), Some(&Value::Bytes(vec![3])));
        assert_eq!(
            third.get("start_datetime").and_then(Value::as_timestamp),
            Some(parse_timestamp("2024-01-03 08:00:00").unwrap())
        );
    }

    #[tokio::test]
    async fn test_sqlite_count() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(&dir).await;

        let mut conn = SqliteSource::connect(&url).await.unwrap();
        let count = conn
            .fetch_count("SELECT COUNT(*) FROM test_results")
            .await
            .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn test_query_error_carries_sql() {
        let dir = TempDir::new().unwrap();
        let url = seeded_db(&dir).await;

        let mut cfg = source(&url, 10);
        cfg.table = "missing_table".to_string();
        let query = build_incremental_query(&cfg, &Checkpoint::default()).unwrap();

        let mut conn = SqliteSource::connect(&url).await.unwrap();
        match conn.fetch_rows(&query).await {
            Err(ImportError::Query { sql, .. }) => {
                assert!(sql.unwrap().contains("missing_table"));
            },
            other => panic!("expected query error, got {:?}", other.map(|r| r.len())),
        }
    }
}
