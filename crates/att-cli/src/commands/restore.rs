//! `att restore` command implementation
//!
//! Replaces the production table with a verified backup snapshot.

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::StageOutcome;
use att_store::backup::{verify_snapshot, BackupController, BackupManifest};
use att_store::DbConfig;
use colored::Colorize;
use std::path::Path;

pub async fn run(manifest_path: &Path, dry_run: bool, yes: bool, report_dir: &Path) -> Result<()> {
    let manifest = BackupManifest::load(manifest_path)?;

    if dry_run {
        let dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let rows = verify_snapshot(&manifest, &dir.join(&manifest.snapshot_file))?;
        println!(
            "Snapshot {} verified: would replace {} with {} rows",
            manifest.snapshot_file, manifest.table, rows
        );
        RunReport::new("restore", true, StageOutcome::Succeeded)
            .with_details(&manifest)?
            .save(report_dir)?;
        return Ok(());
    }

    if !yes {
        return Err(CliError::Usage(format!(
            "restore replaces all {} rows of {}; re-run with --yes to confirm",
            manifest.row_count, manifest.table
        )));
    }

    println!(
        "Restoring {} from {} ({} rows, taken {})",
        manifest.table,
        manifest.snapshot_file,
        manifest.row_count,
        manifest.created_at
    );

    let config = DbConfig::from_env()?;
    let pool = config.connect().await?;

    let controller = BackupController::new(pool);
    let restored = controller.restore(manifest_path).await?;

    println!();
    println!("{}", "Restore Summary:".cyan().bold());
    println!("  Rows restored: {}", restored.to_string().green());
    println!("  Verified against manifest checksum and row count");

    RunReport::new("restore", false, StageOutcome::Succeeded)
        .with_details(&manifest)?
        .save(report_dir)?;
    Ok(())
}
