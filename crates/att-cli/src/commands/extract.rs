//! `att extract` command implementation
//!
//! Streams the trade export files, keeps registry-species rows, and
//! consolidates the per-file artifacts into one combined dataset.

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::StageOutcome;
use att_extract::consolidate::{self, ConsolidationSummary};
use att_extract::extract::{extract_directory, ExtractOptions, ExtractionStats};
use att_extract::SpeciesIndex;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Serialize)]
struct ExtractDetails<'a> {
    extraction: &'a ExtractionStats,
    consolidation: &'a ConsolidationSummary,
}

pub async fn run(
    source_dir: &Path,
    species_file: &Path,
    overrides: Option<&Path>,
    output_dir: &Path,
    chunk_size: usize,
    workers: usize,
    report_dir: &Path,
) -> Result<()> {
    let outcome = execute(
        source_dir,
        species_file,
        overrides,
        output_dir,
        chunk_size,
        workers,
        report_dir,
    )
    .await?;
    if let StageOutcome::Failed { reason } = outcome {
        return Err(CliError::Pipeline(reason));
    }
    Ok(())
}

pub async fn execute(
    source_dir: &Path,
    species_file: &Path,
    overrides: Option<&Path>,
    output_dir: &Path,
    chunk_size: usize,
    workers: usize,
    report_dir: &Path,
) -> Result<StageOutcome> {
    let index = Arc::new(SpeciesIndex::load(species_file, overrides)?);
    println!(
        "Extracting trade records for {} species from {}",
        index.len(),
        source_dir.display()
    );

    let options = ExtractOptions {
        chunk_size,
        workers,
        ..ExtractOptions::default()
    };
    let stats = extract_directory(source_dir, output_dir, Arc::clone(&index), &options).await?;

    let outcome = if stats.files_processed == 0 {
        StageOutcome::failed("every source file failed to process")
    } else {
        let mut warnings = Vec::new();
        if stats.files_failed > 0 {
            warnings.push(format!("{} source file(s) failed", stats.files_failed));
        }
        if stats.rows_skipped > 0 {
            warnings.push(format!("{} malformed row(s) skipped", stats.rows_skipped));
        }
        if stats.total_quantity_issues > 0 {
            warnings.push(format!(
                "{} quantity value(s) flagged",
                stats.total_quantity_issues
            ));
        }
        StageOutcome::with_warnings(warnings)
    };

    if let StageOutcome::Failed { reason } = &outcome {
        println!("{} {}", "Extraction failed:".red().bold(), reason);
        let report = RunReport::new("extract", false, outcome.clone()).with_details(&stats)?;
        report.save(report_dir)?;
        return Ok(outcome);
    }

    let consolidation = consolidate::consolidate_artifacts(output_dir)?;

    println!();
    println!("{}", "Extraction Summary:".cyan().bold());
    println!("  Files processed:  {}", stats.files_processed);
    if stats.files_failed > 0 {
        println!(
            "  Files failed:     {}",
            stats.files_failed.to_string().red()
        );
    }
    println!("  Rows scanned:     {}", stats.total_records_scanned);
    println!(
        "  Rows matched:     {} ({:.3}%)",
        stats.records_matched.to_string().green(),
        stats.match_rate()
    );
    if stats.rows_skipped > 0 {
        println!(
            "  Rows skipped:     {}",
            stats.rows_skipped.to_string().yellow()
        );
    }
    println!("  Species matched:  {}", stats.species_match_counts.len());
    if !stats.species_without_trade.is_empty() {
        println!(
            "  Without trade:    {}",
            stats.species_without_trade.len().to_string().yellow()
        );
    }
    println!("  Combined records: {}", consolidation.total_records);

    for warning in outcome.warnings() {
        println!("  {} {}", "warning:".yellow().bold(), warning);
    }

    let details = ExtractDetails {
        extraction: &stats,
        consolidation: &consolidation,
    };
    let path = RunReport::new("extract", false, outcome.clone())
        .with_details(&details)?
        .save(report_dir)?;
    println!("  Report:           {}", path.display());

    Ok(outcome)
}
