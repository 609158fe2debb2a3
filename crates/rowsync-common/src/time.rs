//! Timestamp parsing
//!
//! Watermarks are stored as naive timestamps (no offset), matching how most
//! source tables store their timestamp columns. Input that carries an offset
//! is normalised to UTC.

use crate::error::{CommonError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Space-separated layout used by SQL engines when rendering timestamps as text.
const SQL_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse an operator- or database-supplied timestamp.
///
/// Accepted layouts, tried in order:
/// - `2024-01-01T00:00:00[.fff]`
/// - `2024-01-01 00:00:00[.fff]`
/// - RFC 3339 with an offset (`2024-01-01T02:00:00+02:00`), converted to UTC
/// - `2024-01-01` (midnight)
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime> {
    let trimmed = input.trim();

    if let Ok(ts) = trimmed.parse::<NaiveDateTime>() {
        return Ok(ts);
    }

    if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, SQL_TEXT_FORMAT) {
        return Ok(ts);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.naive_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }

    Err(CommonError::InvalidTimestamp {
        input: input.to_string(),
    })
}

/// Render a timestamp the way it is written to the checkpoint file.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}
