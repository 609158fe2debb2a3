//! `--test-connection`

use colored::Colorize;
use tracing::error;

use crate::config::AppConfig;
use crate::connection::{self, DatabaseConnectionFactory};

/// Open a connection and count the rows of the source table.
///
/// Prints the outcome and returns whether the test passed.
pub async fn run(config: &AppConfig) -> bool {
    let outcome = async {
        let source = config.source_config()?;
        let factory = DatabaseConnectionFactory::new(source);
        connection::test_connection(&factory).await
    }
    .await;

    match outcome {
        Ok(count) => {
            println!(
                "{} Connected to {} ({})",
                "✓".green(),
                config.database.engine,
                config.database.source_table
            );
            println!("  Rows in {}: {}", config.database.source_table, count);
            true
        },
        Err(e) => {
            error!(error = %e, "Connection test failed");
            println!("{} Connection failed: {}", "✗".red(), e);
            false
        },
    }
}
