//! CLI command implementations
//!
//! Each action has its own module with a `run` function.

pub mod reset_checkpoint;
pub mod run;
pub mod test_connection;
