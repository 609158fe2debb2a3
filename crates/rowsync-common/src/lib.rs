//! Rowsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the rowsync workspace.
//!
//! # Overview
//!
//! - **Logging**: tracing subscriber bootstrap shared by every binary
//! - **Types**: the dynamic row model produced by source drivers
//! - **Time**: lenient timestamp parsing for operator input and stored watermarks
//!
//! # Example
//!
//! ```
//! use rowsync_common::types::{SourceRow, Value};
//!
//! let row = SourceRow::new(
//!     vec!["id".to_string(), "serial_number".to_string()],
//!     vec![Value::Int(42), Value::Text("SN-0001".to_string())],
//! );
//! assert_eq!(row.get("serial_number").and_then(Value::as_str), Some("SN-0001"));
//! ```

pub mod error;
pub mod logging;
pub mod time;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{SourceRow, Value};
