//! Default action: the scheduled import loop, or a single batch with `--once`

use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::AppConfig;
use crate::connection::DatabaseConnectionFactory;
use crate::converter::ColumnMappingConverter;
use crate::error::Result;
use crate::importer::DatabaseImporter;
use crate::scheduler::{Scheduler, TickOutcome};
use crate::sink::HttpReportSink;

/// Importer wired to the real drivers, converter and sink
pub type ConfiguredImporter =
    DatabaseImporter<DatabaseConnectionFactory, ColumnMappingConverter, HttpReportSink>;

/// Build the importer described by `config`
pub fn build_importer(config: &AppConfig) -> Result<ConfiguredImporter> {
    let source = config.source_config()?;
    let factory = DatabaseConnectionFactory::for_import(source.clone())?;
    let converter = ColumnMappingConverter::new(config.report.clone(), &source);
    let sink = HttpReportSink::new(&config.sink)?;
    let store = CheckpointStore::new(&config.import.checkpoint_file)
        .with_lookback_days(config.import.lookback_days);

    DatabaseImporter::new(
        factory,
        converter,
        sink,
        store,
        config.import.advance_policy,
    )
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing the current row");
                token.cancel();
            },
            Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
        }
    });
}

/// Run the import loop until Ctrl-C, or one batch when `once` is set.
pub async fn run(config: &AppConfig, once: bool) -> Result<()> {
    let importer = build_importer(config)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let mut scheduler = Scheduler::new(importer, config.poll_interval(), shutdown);

    if !once {
        println!(
            "{} polling {} every {} minute(s); press Ctrl-C to stop",
            "rowsync".cyan().bold(),
            config.database.source_table,
            config.import.poll_interval_minutes
        );
        scheduler.run().await;
        return Ok(());
    }

    match scheduler.tick().await {
        TickOutcome::Completed(result) => {
            println!(
                "{} imported {} of {} row(s), {} failed",
                "✓".green(),
                result.imported,
                result.fetched,
                result.failed()
            );
            println!("  Checkpoint: {}", result.checkpoint.last_timestamp);
            Ok(())
        },
        TickOutcome::Failed(err) => Err(err),
    }
}
