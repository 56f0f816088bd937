//! `att backup` command implementation

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::StageOutcome;
use att_store::backup::{BackupController, BackupManifest};
use att_store::DbConfig;
use colored::Colorize;
use std::path::Path;

pub async fn run(output_dir: &Path, report_dir: &Path) -> Result<()> {
    let outcome = execute(output_dir, report_dir).await?;
    if let StageOutcome::Failed { reason } = outcome {
        return Err(CliError::Pipeline(reason));
    }
    Ok(())
}

pub async fn execute(output_dir: &Path, report_dir: &Path) -> Result<StageOutcome> {
    let config = DbConfig::from_env()?;
    let pool = config.connect().await?;

    let controller = BackupController::new(pool);
    let manifest_path = controller.snapshot(output_dir).await?;
    let manifest = BackupManifest::load(&manifest_path)?;

    println!();
    println!("{}", "Backup Summary:".cyan().bold());
    println!("  Rows:     {}", manifest.row_count);
    println!("  Species:  {}", manifest.species_count);
    println!("  Checksum: {}", short_checksum(&manifest.checksum_sha256));
    println!("  Manifest: {}", manifest_path.display().to_string().green());
    println!("  Restore:  {}", manifest.restore_hint);

    let outcome = StageOutcome::Succeeded;
    RunReport::new("backup", false, outcome.clone())
        .with_details(&manifest)?
        .save(report_dir)?;
    Ok(outcome)
}

/// First 16 hex chars for display; manifests from disk may hold anything.
fn short_checksum(checksum: &str) -> &str {
    checksum.get(..16).unwrap_or(checksum)
}
