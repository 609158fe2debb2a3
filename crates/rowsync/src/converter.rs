//! Row to report conversion
//!
//! The importer only needs [`RowConverter`]; [`ColumnMappingConverter`] is the
//! built-in implementation driven by the `[report]` config section.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{ReportConfig, SourceConfig};
use crate::error::ConversionError;
use rowsync_common::{SourceRow, Value};

/// Turns one source row into one report
pub trait RowConverter: Send + Sync {
    type Report: Send + 'static;

    fn convert(&self, row: &SourceRow) -> Result<Self::Report, ConversionError>;
}

/// Overall result of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    Passed,
    Failed,
    Unknown,
}

impl ReportStatus {
    fn from_value(value: Option<&Value>) -> Self {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return ReportStatus::Unknown;
        };

        match value {
            Value::Bool(true) => ReportStatus::Passed,
            Value::Bool(false) => ReportStatus::Failed,
            Value::Int(n) => {
                if *n != 0 {
                    ReportStatus::Passed
                } else {
                    ReportStatus::Failed
                }
            },
            other => match other.to_text() {
                Some(text) => match text.trim().to_uppercase().as_str() {
                    "PASS" | "PASSED" | "P" | "TRUE" => ReportStatus::Passed,
                    _ => ReportStatus::Failed,
                },
                None => ReportStatus::Unknown,
            },
        }
    }
}

/// Report submitted to the report server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub serial_number: String,
    pub part_number: String,
    pub operation_type_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub status: ReportStatus,
    pub start: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    /// Every column not mapped above
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Builds [`TestReport`]s from configured column names
#[derive(Debug, Clone)]
pub struct ColumnMappingConverter {
    report: ReportConfig,
    timestamp_column: String,
    id_column: Option<String>,
}

impl ColumnMappingConverter {
    pub fn new(report: ReportConfig, source: &SourceConfig) -> Self {
        Self {
            report,
            timestamp_column: source.timestamp_column.clone(),
            id_column: source.id_column.clone(),
        }
    }

    fn required_text(&self, row: &SourceRow, column: &str) -> Result<String, ConversionError> {
        row.get(column)
            .and_then(Value::to_text)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConversionError::missing_column(column))
    }

    fn optional_text(row: &SourceRow, column: Option<&String>) -> Option<String> {
        column
            .and_then(|c| row.get(c))
            .and_then(Value::to_text)
            .filter(|s| !s.trim().is_empty())
    }

    fn is_mapped(&self, column: &str) -> bool {
        let r = &self.report;
        [
            Some(&r.serial_number_column),
            Some(&r.part_number_column),
            r.revision_column.as_ref(),
            r.operator_column.as_ref(),
            r.status_column.as_ref(),
            Some(&self.timestamp_column),
            self.id_column.as_ref(),
        ]
        .into_iter()
        .flatten()
        .any(|c| c.eq_ignore_ascii_case(column))
    }
}

impl RowConverter for ColumnMappingConverter {
    type Report = TestReport;

    fn convert(&self, row: &SourceRow) -> Result<TestReport, ConversionError> {
        let serial_number = self.required_text(row, &self.report.serial_number_column)?;
        let part_number = self.required_text(row, &self.report.part_number_column)?;

        let start = row
            .get(&self.timestamp_column)
            .ok_or_else(|| ConversionError::missing_column(&self.timestamp_column))?
            .as_timestamp()
            .ok_or_else(|| {
                ConversionError::new(format!(
                    "column '{}' is not a timestamp",
                    self.timestamp_column
                ))
            })?;

        let source_id = self
            .id_column
            .as_ref()
            .and_then(|c| row.get(c))
            .and_then(Value::as_i64);

        let fields = row
            .iter()
            .filter(|(name, _)| !self.is_mapped(name))
            .map(|(name, value)| (name.to_string(), value.to_json()))
            .collect();

        Ok(TestReport {
            serial_number,
            part_number,
            operation_type_code: self.report.operation_type_code,
            revision: Self::optional_text(row, self.report.revision_column.as_ref()),
            operator: Self::optional_text(row, self.report.operator_column.as_ref()),
            status: ReportStatus::from_value(
                self.report.status_column.as_ref().and_then(|c| row.get(c)),
            ),
            start,
            source_id,
            fields,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dialect::Engine;
    use rowsync_common::time::parse_timestamp;
    use std::time::Duration;

    fn converter() -> ColumnMappingConverter {
        let source = SourceConfig {
            engine: Engine::Sqlite,
            connection_string: "sqlite::memory:".to_string(),
            table: "test_results".to_string(),
            timestamp_column: "start_datetime".to_string(),
            id_column: Some("id".to_string()),
            id_tie_break: false,
            batch_size: 100,
            connect_timeout: Duration::from_secs(5),
        };
        let report = ReportConfig {
            operator_column: Some("operator".to_string()),
            ..ReportConfig::default()
        };
        ColumnMappingConverter::new(report, &source)
    }

    fn row(status: Value, serial: Value) -> SourceRow {
        SourceRow::from_pairs([
            ("id", Value::Int(7)),
            ("start_datetime", Value::from("2024-01-01 08:30:00")),
            ("serial_number", serial),
            ("part_number", Value::from("PN-100")),
            ("operator", Value::from("alice")),
            ("status", status),
            ("voltage", Value::Float(3.3)),
        ])
    }

    #[test]
    fn test_converts_mapped_columns() {
        let report = converter()
            .convert(&row(Value::from("PASS"), Value::from("SN-1")))
            .unwrap();

        assert_eq!(report.serial_number, "SN-1");
        assert_eq!(report.part_number, "PN-100");
        assert_eq!(report.operation_type_code, 100);
        assert_eq!(report.operator.as_deref(), Some("alice"));
        assert_eq!(report.status, ReportStatus::Passed);
        assert_eq!(report.start, parse_timestamp("2024-01-01 08:30:00").unwrap());
        assert_eq!(report.source_id, Some(7));
        assert_eq!(report.fields.len(), 1);
        assert_eq!(report.fields["voltage"], serde_json::json!(3.3));
    }

    #[test]
    fn test_status_mapping() {
        let c = converter();
        let status = |v: Value| c.convert(&row(v, Value::from("SN"))).unwrap().status;

        assert_eq!(status(Value::from("passed")), ReportStatus::Passed);
        assert_eq!(status(Value::from("P")), ReportStatus::Passed);
        assert_eq!(status(Value::Bool(true)), ReportStatus::Passed);
        assert_eq!(status(Value::from("FAIL")), ReportStatus::Failed);
        assert_eq!(status(Value::Int(0)), ReportStatus::Failed);
        assert_eq!(status(Value::Null), ReportStatus::Unknown);
    }

    #[test]
    fn test_missing_serial_number_is_a_conversion_error() {
        let err = converter()
            .convert(&row(Value::from("PASS"), Value::Null))
            .unwrap_err();
        assert!(err.message.contains("serial_number"));
    }

    #[test]
    fn test_bad_timestamp_is_a_conversion_error() {
        let bad = SourceRow::from_pairs([
            ("start_datetime", Value::from("yesterday")),
            ("serial_number", Value::from("SN")),
            ("part_number", Value::from("PN")),
        ]);
        let err = converter().convert(&bad).unwrap_err();
        assert!(err.message.contains("start_datetime"));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = converter()
            .convert(&row(Value::from("PASS"), Value::from("SN-1")))
            .unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["serialNumber"], "SN-1");
        assert_eq!(json["operationTypeCode"], 100);
        assert_eq!(json["sourceId"], 7);
        assert!(json.get("revision").is_none());
    }
}
