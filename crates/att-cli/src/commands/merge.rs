//! `att merge` command implementation
//!
//! Refuses to run without a passing validation verdict unless forced.

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::StageOutcome;
use att_store::merge::{MergeEngine, MergeStrategy};
use att_store::validate::ValidationReport;
use att_store::DbConfig;
use colored::Colorize;
use std::path::Path;
use tracing::warn;

/// Check the latest validation verdict. Missing report or a failed verdict
/// blocks the merge; `force` overrides both.
fn check_gate(report_dir: &Path, force: bool) -> Result<()> {
    let path = super::validate::report_path(report_dir);
    if !path.is_file() {
        if force {
            warn!("Merging without a validation report (--force)");
            return Ok(());
        }
        return Err(CliError::GateFailed(format!(
            "no validation report at {}; run `att validate` first",
            path.display()
        )));
    }

    let text = std::fs::read_to_string(&path)?;
    let report: ValidationReport =
        serde_json::from_str(&text).map_err(att_common::AttError::Serialization)?;
    if !report.status.may_proceed() {
        if force {
            warn!("Validation verdict is Failed; merging anyway (--force)");
            return Ok(());
        }
        return Err(CliError::GateFailed(
            "latest validation verdict is Failed; fix staging or pass --force".to_string(),
        ));
    }
    Ok(())
}

pub async fn run(
    dry_run: bool,
    batch_size: usize,
    strategy: MergeStrategy,
    force: bool,
    report_dir: &Path,
) -> Result<()> {
    let outcome = execute(dry_run, batch_size, strategy, force, report_dir).await?;
    if let StageOutcome::Failed { reason } = outcome {
        return Err(CliError::Pipeline(reason));
    }
    Ok(())
}

pub async fn execute(
    dry_run: bool,
    batch_size: usize,
    strategy: MergeStrategy,
    force: bool,
    report_dir: &Path,
) -> Result<StageOutcome> {
    check_gate(report_dir, force)?;

    let config = DbConfig::from_env()?;
    let pool = config.connect().await?;

    let engine = MergeEngine::new(pool)
        .with_batch_size(batch_size)
        .with_dry_run(dry_run)
        .with_strategy(strategy);
    let report = engine.merge().await?;

    println!();
    println!("{}", "Merge Summary:".cyan().bold());
    println!("  Staging rows:      {}", report.staging_count);
    println!("  Production before: {}", report.production_before);
    println!(
        "  Inserted:          {}",
        report.inserted.to_string().green()
    );
    println!("  Duplicates:        {}", report.expected_duplicates);
    println!("  Production after:  {}", report.production_after);
    if dry_run {
        println!("  {}", "Dry run: production untouched".yellow());
    }

    let outcome = StageOutcome::Succeeded;
    RunReport::new("merge", dry_run, outcome.clone())
        .with_details(&report)?
        .save(report_dir)?;
    Ok(outcome)
}
