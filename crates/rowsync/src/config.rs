//! Importer configuration
//!
//! Loaded once at startup from a TOML file (`rowsync.toml` by default) and
//! passed around by reference. Secrets can be supplied through the
//! environment instead of the file:
//!
//! - `ROWSYNC_CONNECTION_STRING` overrides `database.connection_string`
//! - `ROWSYNC_API_TOKEN` overrides `sink.api_token`
//!
//! When the file does not exist a default one is written and the caller is
//! expected to stop so the operator can edit it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::dialect::{validate_identifier, validate_table_name, Engine};
use crate::error::{ImportError, Result};

// ============================================================================
// Configuration Constants
// ============================================================================

pub const DEFAULT_CONFIG_FILE: &str = "rowsync.toml";
pub const DEFAULT_ENGINE: &str = "sqlserver";
pub const DEFAULT_CONNECTION_STRING: &str =
    "Server=localhost;Database=TestData;User Id=importer;Password=changeme;TrustServerCertificate=true";
pub const DEFAULT_SOURCE_TABLE: &str = "test_results";
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "start_datetime";
pub const DEFAULT_ID_COLUMN: &str = "id";
pub const DEFAULT_BATCH_SIZE: u32 = 100;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_POLL_INTERVAL_MINUTES: u64 = 5;
pub const DEFAULT_CHECKPOINT_FILE: &str = "checkpoint.json";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_OPERATION_TYPE_CODE: i32 = 100;

/// Written above the serialized settings of a generated config file
const CONFIG_FILE_HEADER: &str = "\
# rowsync configuration
#
# database.engine: sqlserver, mysql, postgresql, sqlite (oracle builds queries
#   but has no bundled driver, so it cannot be used for importing)
# database.id_tie_break: set to true to order rows by (timestamp, id) so rows
#   sharing one timestamp are not lost when a batch ends among them
# import.advance_policy: \"contiguous\" (stop at the first failed row) or
#   \"skip_failed\" (failed rows are never retried)
# import.lookback_days: the first run, with no checkpoint file, starts this many
#   days before the current time in UTC. Source timestamps are compared as-is,
#   so if the source stores local time, shift the start with
#   `rowsync --reset-checkpoint <local timestamp>` before the first run.
#
# ROWSYNC_CONNECTION_STRING and ROWSYNC_API_TOKEN override the secrets below.
";

pub const ENV_CONNECTION_STRING: &str = "ROWSYNC_CONNECTION_STRING";
pub const ENV_API_TOKEN: &str = "ROWSYNC_API_TOKEN";

/// Complete importer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub import: ImportConfig,
    pub sink: SinkConfig,
    pub report: ReportConfig,
}

/// Source database settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlserver, mysql, postgresql, oracle or sqlite
    pub engine: String,
    pub connection_string: String,
    pub source_table: String,
    pub timestamp_column: String,
    /// Tie-breaker id column; empty when the table has none
    pub id_column: String,
    /// Also fetch rows sharing the watermark timestamp with a larger id.
    /// Needs `id_column` to be monotonic within a timestamp.
    pub id_tie_break: bool,
    pub batch_size: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            connection_string: DEFAULT_CONNECTION_STRING.to_string(),
            source_table: DEFAULT_SOURCE_TABLE.to_string(),
            timestamp_column: DEFAULT_TIMESTAMP_COLUMN.to_string(),
            id_column: DEFAULT_ID_COLUMN.to_string(),
            id_tie_break: false,
            batch_size: DEFAULT_BATCH_SIZE,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// How the watermark moves past rows that failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancePolicy {
    /// Stop advancing at the first failed row of a batch
    #[default]
    Contiguous,
    /// Advance past every accepted row; failed rows are not retried
    SkipFailed,
}

/// Scheduling and checkpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    pub poll_interval_minutes: u64,
    pub checkpoint_file: PathBuf,
    pub advance_policy: AdvancePolicy,
    /// How far back the first run starts when no checkpoint exists
    pub lookback_days: u32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: DEFAULT_POLL_INTERVAL_MINUTES,
            checkpoint_file: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            advance_policy: AdvancePolicy::default(),
            lookback_days: crate::checkpoint::DEFAULT_LOOKBACK_DAYS,
        }
    }
}

/// Report server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SinkConfig {
    pub server_url: String,
    pub api_token: String,
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_token: String::new(),
            timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Column mapping for the built-in report converter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub serial_number_column: String,
    pub part_number_column: String,
    pub operation_type_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_column: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            serial_number_column: "serial_number".to_string(),
            part_number_column: "part_number".to_string(),
            operation_type_code: DEFAULT_OPERATION_TYPE_CODE,
            revision_column: None,
            operator_column: None,
            status_column: Some("status".to_string()),
        }
    }
}

/// Validated view of the source settings used by the connection factory
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub engine: Engine,
    pub connection_string: String,
    pub table: String,
    pub timestamp_column: String,
    pub id_column: Option<String>,
    pub id_tie_break: bool,
    pub batch_size: u32,
    pub connect_timeout: Duration,
}

impl SourceConfig {
    /// Id column used to order rows within one timestamp, when enabled
    pub fn tie_break_column(&self) -> Option<&str> {
        self.id_column.as_deref().filter(|_| self.id_tie_break)
    }
}

/// Outcome of [`AppConfig::load_or_create`]
#[derive(Debug)]
pub enum ConfigLoad {
    Loaded(AppConfig),
    /// No file existed; a default one was written here
    Created(PathBuf),
}

impl AppConfig {
    /// Load the config, or write a default file if none exists
    pub fn load_or_create(path: &Path) -> Result<ConfigLoad> {
        if !path.exists() {
            Self::default().write_to(path)?;
            info!(path = %path.display(), "Created default configuration file");
            return Ok(ConfigLoad::Created(path.to_path_buf()));
        }
        Self::load(path).map(ConfigLoad::Loaded)
    }

    /// Parse, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ImportError::config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        let mut config: AppConfig = toml::from_str(&contents).map_err(|e| {
            ImportError::config(format!("Failed to parse '{}': {}", path.display(), e))
        })?;

        config.apply_env_overrides();
        config.validate()?;

        debug!(
            path = %path.display(),
            engine = %config.database.engine,
            table = %config.database.source_table,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let body = toml::to_string_pretty(self)
            .map_err(|e| ImportError::config(format!("Failed to serialize config: {}", e)))?;
        let contents = format!("{}\n{}", CONFIG_FILE_HEADER, body);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ImportError::config(format!("Failed to create '{}': {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, contents).map_err(|e| {
            ImportError::config(format!("Failed to write '{}': {}", path.display(), e))
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Some(conn) = non_empty_env(ENV_CONNECTION_STRING) {
            self.database.connection_string = conn;
        }
        if let Some(token) = non_empty_env(ENV_API_TOKEN) {
            self.sink.api_token = token;
        }
    }

    /// Reject configurations the importer cannot run with
    pub fn validate(&self) -> Result<()> {
        let db = &self.database;

        db.engine.parse::<Engine>()?;

        if db.connection_string.trim().is_empty() {
            return Err(ImportError::config("database.connection_string must not be empty"));
        }
        if db.batch_size == 0 {
            return Err(ImportError::config("database.batch_size must be greater than 0"));
        }
        if self.import.poll_interval_minutes == 0 {
            return Err(ImportError::config(
                "import.poll_interval_minutes must be greater than 0",
            ));
        }
        if self.import.checkpoint_file.as_os_str().is_empty() {
            return Err(ImportError::config("import.checkpoint_file must not be empty"));
        }

        validate_table_name(&db.source_table)?;
        validate_identifier(&db.timestamp_column)?;
        if !db.id_column.is_empty() {
            validate_identifier(&db.id_column)?;
        } else if db.id_tie_break {
            return Err(ImportError::config(
                "database.id_tie_break requires database.id_column",
            ));
        }

        Ok(())
    }

    pub fn source_config(&self) -> Result<SourceConfig> {
        let db = &self.database;
        Ok(SourceConfig {
            engine: db.engine.parse()?,
            connection_string: db.connection_string.clone(),
            table: db.source_table.clone(),
            timestamp_column: db.timestamp_column.clone(),
            id_column: Some(db.id_column.clone()).filter(|c| !c.is_empty()),
            id_tie_break: db.id_tie_break,
            batch_size: db.batch_size,
            connect_timeout: Duration::from_secs(db.connect_timeout_secs),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.import.poll_interval_minutes.saturating_mul(60))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[database]
engine = "postgresql"
connection_string = "postgres://importer@localhost/testdata"
source_table = "test_results"
timestamp_column = "start_datetime"
id_column = "id"
batch_size = 50

[import]
poll_interval_minutes = 2
checkpoint_file = "state/checkpoint.json"
advance_policy = "skip_failed"

[sink]
server_url = "https://reports.example.com"
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.engine, "sqlserver");
        assert_eq!(config.database.source_table, "test_results");
        assert_eq!(config.database.timestamp_column, "start_datetime");
        assert_eq!(config.database.batch_size, 100);
        assert_eq!(config.import.poll_interval_minutes, 5);
        assert_eq!(config.import.checkpoint_file, PathBuf::from("checkpoint.json"));
        assert_eq!(config.import.advance_policy, AdvancePolicy::Contiguous);
        assert_eq!(config.report.operation_type_code, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_sample() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rowsync.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.database.batch_size, 50);
        assert_eq!(config.import.advance_policy, AdvancePolicy::SkipFailed);
        assert_eq!(config.poll_interval(), Duration::from_secs(120));
        // Sections and keys left out fall back to defaults
        assert_eq!(config.report.operation_type_code, 100);
        assert_eq!(config.sink.timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);

        let source = config.source_config().unwrap();
        assert_eq!(source.engine, Engine::PostgreSql);
        assert_eq!(source.id_column.as_deref(), Some("id"));
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rowsync.toml");

        match AppConfig::load_or_create(&path).unwrap() {
            ConfigLoad::Created(created) => assert_eq!(created, path),
            ConfigLoad::Loaded(_) => panic!("expected a new file"),
        }
        assert!(path.exists());

        match AppConfig::load_or_create(&path).unwrap() {
            ConfigLoad::Loaded(config) => assert_eq!(config, AppConfig::default()),
            ConfigLoad::Created(_) => panic!("expected the file to be loaded"),
        }
    }

    #[test]
    fn test_unknown_engine_is_fatal() {
        let mut config = AppConfig::default();
        config.database.engine = "db2".to_string();
        assert!(matches!(
            config.validate(),
            Err(ImportError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.database.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.import.poll_interval_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.connection_string = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.source_table = "results; DROP TABLE x".to_string();
        assert!(matches!(
            config.validate(),
            Err(ImportError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn test_empty_id_column_means_none() {
        let mut config = AppConfig::default();
        config.database.id_column = String::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.source_config().unwrap().id_column, None);
    }

    #[test]
    fn test_generated_file_documents_clock_and_engines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rowsync.toml");
        AppConfig::default().write_to(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# rowsync configuration"));
        assert!(contents.contains("in UTC"));
        assert!(contents.contains("--reset-checkpoint"));
        assert!(contents.contains("id_tie_break = false"));
        assert_eq!(AppConfig::load(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_tie_break_needs_an_id_column() {
        let mut config = AppConfig::default();
        config.database.id_tie_break = true;
        assert!(config.validate().is_ok());
        assert_eq!(config.source_config().unwrap().tie_break_column(), Some("id"));

        config.database.id_column = String::new();
        assert!(matches!(config.validate(), Err(ImportError::Config(_))));
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[database\nengine = ").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
