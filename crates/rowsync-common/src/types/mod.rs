//! Dynamic row model shared by the source drivers and row converters

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::time::parse_timestamp;

/// A single column value as decoded from a source engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer view of the value; numeric text is accepted since some
    /// engines hand back DECIMAL/NUMERIC keys as strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Timestamp view of the value. SQLite and some MySQL setups store
    /// timestamps as text, so textual values are parsed leniently.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => parse_timestamp(s).ok(),
            _ => None,
        }
    }

    /// Render the value as display text, `None` for SQL NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(n) => Some(n.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Timestamp(ts) => Some(crate::time::format_timestamp(ts)),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(format!("<{} bytes>", b.len())),
        }
    }

    /// JSON representation used when a row is forwarded as free-form fields.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Timestamp(ts) => serde_json::Value::String(crate::time::format_timestamp(ts)),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One row read from the source table.
///
/// Column lookups are case-insensitive: engines disagree on how they fold
/// unquoted identifiers (Oracle upper-cases, PostgreSQL lower-cases).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceRow {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl SourceRow {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|idx| &self.values[idx])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let row = SourceRow::from_pairs([("SERIAL_NUMBER", "SN-1"), ("Part_Number", "PN-7")]);
        assert_eq!(row.get("serial_number").and_then(Value::as_str), Some("SN-1"));
        assert_eq!(row.get("PART_NUMBER").and_then(Value::as_str), Some("PN-7"));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(7).as_i64(), Some(7));
        assert_eq!(Value::Text(" 12 ".to_string()).as_i64(), Some(12));
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Null.as_i64(), None);
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
    }

    #[test]
    fn test_text_timestamps_are_parsed() {
        let value = Value::Text("2024-01-02 03:04:05".to_string());
        let ts = value.as_timestamp().unwrap();
        assert_eq!(ts.to_string(), "2024-01-02 03:04:05");
        assert!(Value::Int(5).as_timestamp().is_none());
    }

    #[test]
    fn test_option_conversion_maps_none_to_null() {
        let missing: Option<&str> = None;
        assert!(Value::from(missing).is_null());
        assert_eq!(Value::from(Some(5_i64)), Value::Int(5));
    }

    #[test]
    fn test_to_json() {
        assert_eq!(Value::Int(1).to_json(), serde_json::json!(1));
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(Value::Text("x".into()).to_json(), serde_json::json!("x"));
    }
}
