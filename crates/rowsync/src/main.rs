//! rowsync - Main entry point

use clap::Parser;
use rowsync::commands;
use rowsync::config::{AppConfig, ConfigLoad};
use rowsync::{Action, Cli};
use rowsync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // Load .env before clap so env-backed flags see it
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Console)
        .log_file_prefix("rowsync")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI should work without logging
    let guard = init_logging(&log_config).ok();

    let code = match execute(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            1
        },
    };

    // Flush buffered log lines before exiting
    drop(guard);
    process::exit(code);
}

/// Execute the requested action and return the process exit code
async fn execute(cli: &Cli) -> anyhow::Result<i32> {
    let config = match AppConfig::load_or_create(&cli.config)? {
        ConfigLoad::Loaded(config) => config,
        ConfigLoad::Created(path) => {
            println!("Created default configuration at {}", path.display());
            println!("Edit it to point at your source database and report server, then run again.");
            return Ok(1);
        },
    };

    match cli.action() {
        Action::ResetCheckpoint(timestamp) => {
            commands::reset_checkpoint::run(&config, timestamp.as_deref())?;
            Ok(0)
        },
        Action::TestConnection => {
            let ok = commands::test_connection::run(&config).await;
            Ok(if ok { 0 } else { 1 })
        },
        Action::Run { once } => {
            commands::run::run(&config, once).await?;
            Ok(0)
        },
    }
}
