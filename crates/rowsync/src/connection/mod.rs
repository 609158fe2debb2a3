//! Source connections
//!
//! [`ConnectionFactory`] is the seam between the importer and the database:
//! it opens connections and owns the dialect-specific query text. The
//! importer never looks at the engine itself.
//!
//! Drivers:
//! - PostgreSQL, MySQL, SQLite through `sqlx`
//! - SQL Server through `tiberius`
//! - Oracle has a dialect row but no bundled driver

mod sqlserver;
mod sqlx_backend;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::checkpoint::Checkpoint;
use crate::config::SourceConfig;
use crate::dialect::{self, Engine, IncrementalQuery};
use crate::error::{ImportError, Result};
use rowsync_common::SourceRow;

pub use sqlserver::SqlServerConnection;
pub use sqlx_backend::{MySqlSource, PgSource, SqliteSource};

/// An open connection to the source database
#[async_trait]
pub trait SourceConnection: Send {
    /// Execute the incremental query and return every row, in result order
    async fn fetch_rows(&mut self, query: &IncrementalQuery) -> Result<Vec<SourceRow>>;

    /// Execute a single-value `COUNT(*)` query
    async fn fetch_count(&mut self, sql: &str) -> Result<i64>;

    /// Release the connection
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Opens source connections and builds the queries they run
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    fn source(&self) -> &SourceConfig;

    async fn create_connection(&self) -> Result<Box<dyn SourceConnection>>;

    fn build_incremental_query(&self, checkpoint: &Checkpoint) -> Result<IncrementalQuery> {
        dialect::build_incremental_query(self.source(), checkpoint)
    }

    fn build_count_query(&self) -> Result<String> {
        dialect::build_count_query(self.source())
    }
}

/// Factory backed by the real database drivers
#[derive(Debug, Clone)]
pub struct DatabaseConnectionFactory {
    source: SourceConfig,
}

impl DatabaseConnectionFactory {
    pub fn new(source: SourceConfig) -> Self {
        Self { source }
    }

    /// Factory for the import loop: fails up front when no driver is bundled
    /// for the engine, instead of on every scheduled batch.
    pub fn for_import(source: SourceConfig) -> Result<Self> {
        if !driver_available(source.engine) {
            return Err(ImportError::DriverUnavailable(source.engine));
        }
        Ok(Self::new(source))
    }
}

/// Whether this build can open connections to `engine`
pub fn driver_available(engine: Engine) -> bool {
    !matches!(engine, Engine::Oracle)
}

#[async_trait]
impl ConnectionFactory for DatabaseConnectionFactory {
    fn source(&self) -> &SourceConfig {
        &self.source
    }

    #[instrument(skip(self), fields(engine = %self.source.engine))]
    async fn create_connection(&self) -> Result<Box<dyn SourceConnection>> {
        let conn_str = self.source.connection_string.as_str();

        let connect = async {
            let conn: Box<dyn SourceConnection> = match self.source.engine {
                Engine::PostgreSql => Box::new(PgSource::connect(conn_str).await?),
                Engine::MySql => Box::new(MySqlSource::connect(conn_str).await?),
                Engine::Sqlite => Box::new(SqliteSource::connect(conn_str).await?),
                Engine::SqlServer => Box::new(SqlServerConnection::connect(conn_str).await?),
                Engine::Oracle => return Err(ImportError::DriverUnavailable(Engine::Oracle)),
            };
            Ok(conn)
        };

        let conn = tokio::time::timeout(self.source.connect_timeout, connect)
            .await
            .map_err(|_| {
                ImportError::connection(format!(
                    "timed out after {}s connecting to {}",
                    self.source.connect_timeout.as_secs(),
                    self.source.engine
                ))
            })??;

        debug!("Connection opened");
        Ok(conn)
    }
}

/// Open a connection, count the rows of the source table and close it again
pub async fn test_connection(factory: &dyn ConnectionFactory) -> Result<i64> {
    let sql = factory.build_count_query()?;
    let mut conn = factory.create_connection().await?;
    let count = conn.fetch_count(&sql).await;
    let closed = conn.close().await;
    let count = count?;
    closed?;
    Ok(count)
}
