//! SQL Server source on top of `tiberius`
//!
//! The connection string is an ADO.NET-style string
//! (`Server=host,1433;Database=db;User Id=u;Password=p;TrustServerCertificate=true`).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tiberius::{Client, Config, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use super::SourceConnection;
use crate::dialect::{BindStyle, IncrementalQuery};
use crate::error::{ImportError, Result};
use rowsync_common::{SourceRow, Value};

/// Single SQL Server connection
pub struct SqlServerConnection {
    client: Client<Compat<TcpStream>>,
}

impl SqlServerConnection {
    pub async fn connect(conn_str: &str) -> Result<Self> {
        let config = Config::from_ado_string(conn_str).map_err(|e| {
            ImportError::connection_with("invalid SQL Server connection string", e)
        })?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| ImportError::connection_with("failed to reach SQL Server", e))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| ImportError::connection_with("failed to authenticate to SQL Server", e))?;

        Ok(Self { client })
    }
}

fn bind_value(query: &mut Query<'_>, value: Value) {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(n) => query.bind(n),
        Value::Float(f) => query.bind(f),
        Value::Timestamp(ts) => query.bind(ts),
        Value::Text(s) => query.bind(s),
        Value::Bytes(b) => query.bind(b),
    }
}

#[async_trait]
impl SourceConnection for SqlServerConnection {
    async fn fetch_rows(&mut self, query: &IncrementalQuery) -> Result<Vec<SourceRow>> {
        let native = query.to_native(BindStyle::AtP);
        debug!(sql = %native.sql, params = native.values.len(), "Executing incremental query");

        let mut tds_query = Query::new(native.sql.clone());
        for value in native.values {
            bind_value(&mut tds_query, value);
        }

        let rows = tds_query
            .query(&mut self.client)
            .await
            .map_err(|e| ImportError::query_with("incremental query failed", native.sql.clone(), e))?
            .into_first_result()
            .await
            .map_err(|e| ImportError::query_with("failed to read result set", native.sql.clone(), e))?;

        Ok(rows.iter().map(decode_row).collect())
    }

    async fn fetch_count(&mut self, sql: &str) -> Result<i64> {
        let row = self
            .client
            .query(sql, &[])
            .await
            .map_err(|e| ImportError::query_with("count query failed", sql, e))?
            .into_row()
            .await
            .map_err(|e| ImportError::query_with("count query failed", sql, e))?;

        // COUNT(*) is INT on SQL Server; COUNT_BIG would be BIGINT.
        let count = row.as_ref().and_then(|r| {
            r.try_get::<i32, _>(0)
                .ok()
                .flatten()
                .map(i64::from)
                .or_else(|| r.try_get::<i64, _>(0).ok().flatten())
        });

        count.ok_or_else(|| ImportError::Query {
            message: "count query returned no value".to_string(),
            sql: Some(sql.to_string()),
            source: None,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.client
            .close()
            .await
            .map_err(|e| ImportError::connection_with("failed to close SQL Server connection", e))
    }
}

fn decode_row(row: &tiberius::Row) -> SourceRow {
    let columns = row
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    let values = (0..row.len()).map(|idx| decode_value(row, idx)).collect();
    SourceRow::new(columns, values)
}

/// Probe typed getters in order; a `None` from every getter means NULL.
fn decode_value(row: &tiberius::Row, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<u8, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return Value::Int(v);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(idx) {
        return Value::Float(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return Value::Float(v);
    }
    if let Ok(Some(v)) = row.try_get::<NaiveDateTime, _>(idx) {
        return Value::Timestamp(v);
    }
    if let Ok(Some(v)) = row.try_get::<DateTime<Utc>, _>(idx) {
        return Value::Timestamp(v.naive_utc());
    }
    if let Ok(Some(v)) = row.try_get::<NaiveDate, _>(idx) {
        if let Some(ts) = v.and_hms_opt(0, 0, 0) {
            return Value::Timestamp(ts);
        }
    }
    if let Ok(Some(v)) = row.try_get::<tiberius::numeric::Numeric, _>(idx) {
        return Value::Text(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return Value::Text(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<tiberius::Uuid, _>(idx) {
        return Value::Text(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<&[u8], _>(idx) {
        return Value::Bytes(v.to_vec());
    }

    Value::Null
}
