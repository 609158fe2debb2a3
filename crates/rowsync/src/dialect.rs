//! SQL dialect table and incremental query building
//!
//! Every engine difference the importer cares about lives in [`DIALECTS`]:
//! the named-parameter marker style, the row-limiting clause and the
//! placeholder syntax of the driver that executes the query. It also records
//! whether timestamps can be compared directly or need normalising first
//! (SQLite stores them as text). Nothing else in the crate branches on the
//! engine for SQL text.
//!
//! Queries are built with named markers (`@lastTime`, `:batchSize`) and
//! rewritten to the driver's positional placeholders right before execution
//! ([`IncrementalQuery::to_native`]).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::checkpoint::Checkpoint;
use crate::config::SourceConfig;
use crate::error::{ImportError, Result};
use rowsync_common::Value;

/// Parameter bound to the checkpoint timestamp
pub const LAST_TIME_PARAM: &str = "lastTime";

/// Parameter bound to the configured batch size
pub const BATCH_SIZE_PARAM: &str = "batchSize";

/// Parameter bound to the checkpoint id when the id tie-break is enabled
pub const LAST_ID_PARAM: &str = "lastId";

/// Supported relational engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    SqlServer,
    MySql,
    PostgreSql,
    Oracle,
    Sqlite,
}

impl Engine {
    pub const ALL: [Engine; 5] = [
        Engine::SqlServer,
        Engine::MySql,
        Engine::PostgreSql,
        Engine::Oracle,
        Engine::Sqlite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Engine::SqlServer => "sqlserver",
            Engine::MySql => "mysql",
            Engine::PostgreSql => "postgresql",
            Engine::Oracle => "oracle",
            Engine::Sqlite => "sqlite",
        }
    }

    /// Dialect row for this engine
    pub fn dialect(self) -> &'static Dialect {
        // DIALECTS holds exactly one row per engine, in `Engine::ALL` order.
        &DIALECTS[self as usize]
    }
}

impl FromStr for Engine {
    type Err = ImportError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlserver" | "mssql" => Ok(Engine::SqlServer),
            "mysql" => Ok(Engine::MySql),
            "postgresql" | "postgres" | "pg" => Ok(Engine::PostgreSql),
            "oracle" => Ok(Engine::Oracle),
            "sqlite" | "sqlite3" => Ok(Engine::Sqlite),
            _ => Err(ImportError::UnsupportedEngine(s.to_string())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How named parameters are written in generated SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStyle {
    /// `@name`
    At,
    /// `:name`
    Colon,
}

impl MarkerStyle {
    pub fn marker(self, name: &str) -> String {
        match self {
            MarkerStyle::At => format!("@{}", name),
            MarkerStyle::Colon => format!(":{}", name),
        }
    }
}

/// Where the batch bound goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLimit {
    /// `SELECT TOP(n) ...`
    Top,
    /// `... LIMIT n`
    Limit,
    /// `SELECT * FROM (...) WHERE ROWNUM <= n`
    RowNum,
}

/// How timestamp values are compared and ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampCompare {
    /// The column has a real timestamp type; compare directly
    Native,
    /// Timestamps are stored as text in mixed layouts (`T` or space
    /// separated); compare `julianday(...)` values instead of strings
    JulianDay,
}

impl TimestampCompare {
    pub fn wrap(self, expr: &str) -> String {
        match self {
            TimestampCompare::Native => expr.to_string(),
            TimestampCompare::JulianDay => format!("julianday({})", expr),
        }
    }
}

/// Placeholder syntax understood by the executing driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStyle {
    /// `$1, $2` (PostgreSQL)
    Dollar,
    /// `?` (MySQL, SQLite)
    Question,
    /// `@P1, @P2` (SQL Server via TDS)
    AtP,
    /// Named markers are passed through unchanged
    Named,
}

/// One row of the dialect table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub engine: Engine,
    pub markers: MarkerStyle,
    pub row_limit: RowLimit,
    pub bind: BindStyle,
    pub timestamps: TimestampCompare,
}

/// Dialect table, indexed by `Engine as usize`
pub static DIALECTS: [Dialect; 5] = [
    Dialect {
        engine: Engine::SqlServer,
        markers: MarkerStyle::At,
        row_limit: RowLimit::Top,
        bind: BindStyle::AtP,
        timestamps: TimestampCompare::Native,
    },
    Dialect {
        engine: Engine::MySql,
        markers: MarkerStyle::At,
        row_limit: RowLimit::Limit,
        bind: BindStyle::Question,
        timestamps: TimestampCompare::Native,
    },
    Dialect {
        engine: Engine::PostgreSql,
        markers: MarkerStyle::At,
        row_limit: RowLimit::Limit,
        bind: BindStyle::Dollar,
        timestamps: TimestampCompare::Native,
    },
    Dialect {
        engine: Engine::Oracle,
        markers: MarkerStyle::Colon,
        row_limit: RowLimit::RowNum,
        bind: BindStyle::Named,
        timestamps: TimestampCompare::Native,
    },
    Dialect {
        engine: Engine::Sqlite,
        markers: MarkerStyle::At,
        row_limit: RowLimit::Limit,
        bind: BindStyle::Question,
        timestamps: TimestampCompare::JulianDay,
    },
];

/// A named query parameter
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParam {
    pub name: &'static str,
    pub value: Value,
}

/// Parameterized incremental query, in dialect form
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
    pub markers: MarkerStyle,
}

/// Query rewritten for a specific driver: positional values in bind order
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    pub sql: String,
    pub values: Vec<Value>,
}

impl IncrementalQuery {
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Watermark timestamp the query is bound to
    pub fn last_time(&self) -> Option<NaiveDateTime> {
        self.param(LAST_TIME_PARAM).and_then(Value::as_timestamp)
    }

    /// Batch bound the query is bound to
    pub fn batch_size(&self) -> Option<i64> {
        self.param(BATCH_SIZE_PARAM).and_then(Value::as_i64)
    }

    /// Rewrite named markers into the driver's placeholders.
    ///
    /// Markers are numbered in textual order, so `TOP(@batchSize) ... @lastTime`
    /// binds the batch size first.
    pub fn to_native(&self, bind: BindStyle) -> NativeQuery {
        let markers: Vec<(String, &QueryParam)> = self
            .params
            .iter()
            .map(|p| (self.markers.marker(p.name), p))
            .collect();

        let mut sql = String::with_capacity(self.sql.len());
        let mut values = Vec::new();
        let mut rest = self.sql.as_str();

        while !rest.is_empty() {
            let hit = markers
                .iter()
                .find(|(marker, _)| starts_with_marker(rest, marker));

            match hit {
                Some((marker, param)) => {
                    values.push(param.value.clone());
                    match bind {
                        BindStyle::Dollar => sql.push_str(&format!("${}", values.len())),
                        BindStyle::Question => sql.push('?'),
                        BindStyle::AtP => sql.push_str(&format!("@P{}", values.len())),
                        BindStyle::Named => sql.push_str(marker),
                    }
                    rest = &rest[marker.len()..];
                },
                None => {
                    let mut chars = rest.chars();
                    if let Some(c) = chars.next() {
                        sql.push(c);
                    }
                    rest = chars.as_str();
                },
            }
        }

        NativeQuery { sql, values }
    }
}

fn starts_with_marker(text: &str, marker: &str) -> bool {
    text.starts_with(marker)
        && !text[marker.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build the incremental query for the configured source and watermark:
///
/// `SELECT [TOP] * FROM <table> WHERE <ts> > :lastTime ORDER BY <ts> ASC [LIMIT|ROWNUM]`
///
/// With the id tie-break enabled the filter becomes
/// `(<ts> > :lastTime OR (<ts> = :lastTime AND <id> > :lastId))`, ordered by
/// `<ts>, <id>`, so rows sharing the watermark timestamp are not lost when a
/// batch bound splits them.
///
/// The batch bound is always enforced in SQL, never by truncating a fetched
/// result set.
pub fn build_incremental_query(
    source: &SourceConfig,
    checkpoint: &Checkpoint,
) -> Result<IncrementalQuery> {
    validate_table_name(&source.table)?;
    validate_identifier(&source.timestamp_column)?;
    let tie_break = source.tie_break_column();
    if let Some(id) = tie_break {
        validate_identifier(id)?;
    }

    let dialect = source.engine.dialect();
    let marker = |name: &str| dialect.markers.marker(name);
    let table = &source.table;
    let ts = dialect.timestamps.wrap(&source.timestamp_column);
    let last = dialect.timestamps.wrap(&marker(LAST_TIME_PARAM));
    let limit = marker(BATCH_SIZE_PARAM);

    let (filter, order) = match tie_break {
        None => (format!("{ts} > {last}"), format!("{ts} ASC")),
        Some(id) => (
            format!(
                "({ts} > {last} OR ({ts} = {last} AND {id} > {}))",
                marker(LAST_ID_PARAM)
            ),
            format!("{ts} ASC, {id} ASC"),
        ),
    };

    let sql = match dialect.row_limit {
        RowLimit::Top => format!(
            "SELECT TOP({limit}) * FROM {table} WHERE {filter} ORDER BY {order}"
        ),
        RowLimit::Limit => format!(
            "SELECT * FROM {table} WHERE {filter} ORDER BY {order} LIMIT {limit}"
        ),
        // ROWNUM is assigned before ORDER BY, so the ordering must happen in a subquery.
        RowLimit::RowNum => format!(
            "SELECT * FROM (SELECT * FROM {table} WHERE {filter} ORDER BY {order}) WHERE ROWNUM <= {limit}"
        ),
    };

    let mut params = vec![
        QueryParam {
            name: LAST_TIME_PARAM,
            value: Value::Timestamp(checkpoint.last_timestamp),
        },
        QueryParam {
            name: BATCH_SIZE_PARAM,
            value: Value::Int(i64::from(source.batch_size)),
        },
    ];
    if tie_break.is_some() {
        params.push(QueryParam {
            name: LAST_ID_PARAM,
            value: Value::Int(checkpoint.last_id),
        });
    }

    Ok(IncrementalQuery {
        sql,
        params,
        markers: dialect.markers,
    })
}

/// `SELECT COUNT(*) FROM <table>`, used by the connection test
pub fn build_count_query(source: &SourceConfig) -> Result<String> {
    validate_table_name(&source.table)?;
    Ok(format!("SELECT COUNT(*) FROM {}", source.table))
}

/// Validate a plain SQL identifier (`^[A-Za-z_][A-Za-z0-9_]{0,127}$`).
///
/// Table and column names come from configuration and are interpolated into
/// SQL text, so anything beyond a bare identifier is rejected.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ImportError::invalid_identifier(name, "must not be empty"));
    }

    if name.len() > 128 {
        return Err(ImportError::invalid_identifier(
            name,
            format!("too long ({} chars, max 128)", name.len()),
        ));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => {
            return Err(ImportError::invalid_identifier(
                name,
                "must start with a letter or underscore",
            ))
        },
    }

    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(ImportError::invalid_identifier(
            name,
            format!("contains invalid character '{}'", bad),
        ));
    }

    Ok(())
}

/// Validate a table name, optionally schema-qualified (`schema.table`)
pub fn validate_table_name(name: &str) -> Result<()> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(ImportError::invalid_identifier(
            name,
            "at most one schema qualifier is allowed",
        ));
    }
    parts.into_iter().try_for_each(validate_identifier)
}
