//! `att load` command implementation
//!
//! Reads every species archive, restores the original records, resolves
//! them against the registry, and loads staging.

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::{AttError, StageOutcome};
use att_extract::archive::SpeciesArchive;
use att_extract::species::SynonymOverride;
use att_extract::TradeRecord;
use att_store::staging::{IncomingRecord, LoadReport, StagingLoader};
use att_store::{DbConfig, RegistrySnapshot};
use colored::Colorize;
use std::path::{Path, PathBuf};

fn to_incoming(record: TradeRecord) -> IncomingRecord {
    IncomingRecord {
        taxon: record.taxon,
        year: record.year,
        appendix: record.appendix,
        term: record.term,
        unit: record.unit,
        importer: record.importer,
        exporter: record.exporter,
        origin: record.origin,
        purpose: record.purpose,
        source: record.source,
        reporter_type: record.reporter_type,
        quantity: record.quantity_normalized,
    }
}

/// Archive files under `dir`, preferring the gzipped rendition when both
/// are present.
fn archive_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut gz = Vec::new();
    let mut plain = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().map(|n| n.to_string_lossy().to_string());
        let Some(name) = name else { continue };
        if name.ends_with("_trade_data_optimized.json.gz") {
            gz.push(path);
        } else if name.ends_with("_trade_data_optimized.json") {
            plain.push(path);
        }
    }
    for path in plain {
        let twin = PathBuf::from(format!("{}.gz", path.display()));
        if !twin.is_file() {
            gz.push(path);
        }
    }
    gz.sort();
    if gz.is_empty() {
        return Err(
            AttError::Archive(format!("no species archives found in {}", dir.display())).into(),
        );
    }
    Ok(gz)
}

/// Load synonym overrides into the registry snapshot as aliases.
fn apply_overrides(snapshot: &mut RegistrySnapshot, overrides: Option<&Path>) -> Result<()> {
    let Some(path) = overrides else {
        return Ok(());
    };
    let text = std::fs::read_to_string(path).map_err(AttError::Io)?;
    let entries: Vec<SynonymOverride> =
        serde_json::from_str(&text).map_err(AttError::Serialization)?;
    for o in entries {
        snapshot.add_alias(&o.source_name, &o.canonical_name);
    }
    Ok(())
}

pub async fn run(
    archive_dir: &Path,
    overrides: Option<&Path>,
    batch_size: usize,
    data_source: &str,
    dry_run: bool,
    resume_from: u64,
    report_dir: &Path,
) -> Result<()> {
    let (outcome, _) = execute(
        archive_dir,
        overrides,
        batch_size,
        data_source,
        dry_run,
        resume_from,
        report_dir,
    )
    .await?;
    if let StageOutcome::Failed { reason } = outcome {
        return Err(CliError::Pipeline(reason));
    }
    Ok(())
}

/// Returns the outcome plus the load report, which the orchestrator feeds
/// into the validation gate as the expected count.
pub async fn execute(
    archive_dir: &Path,
    overrides: Option<&Path>,
    batch_size: usize,
    data_source: &str,
    dry_run: bool,
    resume_from: u64,
    report_dir: &Path,
) -> Result<(StageOutcome, LoadReport)> {
    let files = archive_files(archive_dir)?;
    println!("Loading {} species archive(s) into staging", files.len());

    let mut records: Vec<IncomingRecord> = Vec::new();
    for file in &files {
        let archive = SpeciesArchive::load(file)?;
        let restored = archive.denormalized()?;
        println!(
            "  {} {} ({} records)",
            "read".green(),
            archive.species,
            restored.len()
        );
        records.extend(restored.into_iter().map(to_incoming));
    }

    let config = DbConfig::from_env()?;
    let pool = config.connect().await?;
    // Migrations are DDL; a dry run must leave the database untouched.
    if !dry_run {
        DbConfig::migrate(&pool).await?;
    }

    let mut snapshot = RegistrySnapshot::load(&pool).await?;
    apply_overrides(&mut snapshot, overrides)?;

    let loader = StagingLoader::new(pool)
        .with_batch_size(batch_size)
        .with_data_source(data_source)
        .with_dry_run(dry_run);
    let report = loader.load(records, &snapshot, resume_from).await?;

    let outcome = if !dry_run && report.loaded == 0 && report.resolved > report.skipped_resume {
        StageOutcome::failed("no records were loaded into staging")
    } else {
        let mut warnings = Vec::new();
        if report.unresolved > 0 {
            warnings.push(format!(
                "{} record(s) did not resolve to a registry species",
                report.unresolved
            ));
        }
        if report.failed_rows > 0 {
            warnings.push(format!(
                "{} row(s) failed to insert after batch retries",
                report.failed_rows
            ));
        }
        StageOutcome::with_warnings(warnings)
    };

    println!();
    println!("{}", "Staging Load Summary:".cyan().bold());
    println!("  Total records:  {}", report.total_records);
    println!(
        "  Resolved:       {} ({:.1}%)",
        report.resolved,
        report.mapping_rate()
    );
    if report.unresolved > 0 {
        println!(
            "  Unresolved:     {}",
            report.unresolved.to_string().yellow()
        );
    }
    if report.skipped_resume > 0 {
        println!("  Resumed past:   {}", report.skipped_resume);
    }
    println!(
        "  Loaded:         {} ({:.1}%)",
        report.loaded.to_string().green(),
        report.success_rate()
    );
    if report.failed_rows > 0 {
        println!(
            "  Failed rows:    {} (resume with --resume-from {})",
            report.failed_rows.to_string().red(),
            report.resume_offset()
        );
    }
    if dry_run {
        println!("  {}", "Dry run: staging untouched".yellow());
    }

    for warning in outcome.warnings() {
        println!("  {} {}", "warning:".yellow().bold(), warning);
    }

    let path = RunReport::new("load", dry_run, outcome.clone())
        .with_details(&report)?
        .save(report_dir)?;
    println!("  Report:         {}", path.display());

    Ok((outcome, report))
}
