//! Arctic Trade Tracker - Main entry point

use att_cli::{Cli, Commands};
use att_common::logging::{init_logging, LogConfig, LogLevel};
use clap::Parser;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Verbose gets debug on the console; normal runs keep the console for
    // summaries and warnings. An explicit LOG_LEVEL takes precedence.
    let flag_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let log_config = match LogConfig::from_env() {
        Ok(mut config) => {
            if std::env::var("LOG_LEVEL").is_err() {
                config = config.with_level(flag_level);
            }
            config.with_prefix("att")
        }
        Err(_) => LogConfig::new().with_level(flag_level).with_prefix("att"),
    };

    // The CLI must work even when logging cannot be set up.
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// Dispatch to the per-stage command modules.
async fn execute_command(cli: &Cli) -> att_cli::Result<()> {
    match &cli.command {
        Commands::Extract {
            source_dir,
            species_file,
            overrides,
            output_dir,
            chunk_size,
            workers,
        } => {
            att_cli::commands::extract::run(
                source_dir,
                species_file,
                overrides.as_deref(),
                output_dir,
                *chunk_size,
                *workers,
                &cli.report_dir,
            )
            .await
        }

        Commands::Normalize {
            input_dir,
            output_dir,
            species_file,
            overrides,
            incremental,
        } => {
            att_cli::commands::normalize::run(
                input_dir,
                output_dir,
                species_file,
                overrides.as_deref(),
                *incremental,
                &cli.report_dir,
            )
            .await
        }

        Commands::Load {
            archive_dir,
            overrides,
            batch_size,
            data_source,
            dry_run,
            resume_from,
        } => {
            att_cli::commands::load::run(
                archive_dir,
                overrides.as_deref(),
                *batch_size,
                data_source,
                *dry_run,
                *resume_from,
                &cli.report_dir,
            )
            .await
        }

        Commands::Validate {
            expected_count,
            latency_threshold_ms,
        } => {
            att_cli::commands::validate::run(
                *expected_count,
                *latency_threshold_ms,
                &cli.report_dir,
            )
            .await
        }

        Commands::Backup { output_dir } => {
            att_cli::commands::backup::run(output_dir, &cli.report_dir).await
        }

        Commands::Merge {
            dry_run,
            batch_size,
            strategy,
            force,
        } => {
            att_cli::commands::merge::run(
                *dry_run,
                *batch_size,
                (*strategy).into(),
                *force,
                &cli.report_dir,
            )
            .await
        }

        Commands::Restore {
            manifest,
            dry_run,
            yes,
        } => att_cli::commands::restore::run(manifest, *dry_run, *yes, &cli.report_dir).await,

        Commands::Run {
            source_dir,
            species_file,
            overrides,
            work_dir,
            backup,
            dry_run,
        } => {
            att_cli::commands::run::run(
                source_dir,
                species_file,
                overrides.as_deref(),
                work_dir,
                *backup,
                *dry_run,
                &cli.report_dir,
            )
            .await
        }
    }
}
