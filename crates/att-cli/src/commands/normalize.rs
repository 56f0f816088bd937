//! `att normalize` command implementation
//!
//! Groups the combined dataset by canonical species and writes one
//! dictionary-encoded archive per species, in plain and gzipped JSON.

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::StageOutcome;
use att_extract::archive::{existing_archive_species, group_by_species, SpeciesArchive};
use att_extract::consolidate::read_combined;
use att_extract::SpeciesIndex;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Serialize)]
struct ArchiveEntry {
    species: String,
    records: u64,
    taxonomic_entries: u64,
    locations: u64,
    json_bytes: u64,
    gz_bytes: u64,
}

#[derive(Serialize)]
struct NormalizeDetails {
    archives_written: u64,
    archives_skipped: u64,
    records_archived: u64,
    total_json_bytes: u64,
    total_gz_bytes: u64,
    archives: Vec<ArchiveEntry>,
}

pub async fn run(
    input_dir: &Path,
    output_dir: &Path,
    species_file: &Path,
    overrides: Option<&Path>,
    incremental: bool,
    report_dir: &Path,
) -> Result<()> {
    let outcome = execute(
        input_dir,
        output_dir,
        species_file,
        overrides,
        incremental,
        report_dir,
    )
    .await?;
    if let StageOutcome::Failed { reason } = outcome {
        return Err(CliError::Pipeline(reason));
    }
    Ok(())
}

pub async fn execute(
    input_dir: &Path,
    output_dir: &Path,
    species_file: &Path,
    overrides: Option<&Path>,
    incremental: bool,
    report_dir: &Path,
) -> Result<StageOutcome> {
    let index = SpeciesIndex::load(species_file, overrides)?;
    let records = read_combined(input_dir)?;
    if records.is_empty() {
        let outcome = StageOutcome::failed("combined dataset is empty; run extract first");
        RunReport::new("normalize", false, outcome.clone()).save(report_dir)?;
        return Ok(outcome);
    }

    // Map every taxon spelling in the data to its canonical registry name.
    let mut canonical: BTreeMap<String, String> = BTreeMap::new();
    for record in &records {
        if let Some(entry) = index.match_taxon(&record.taxon) {
            canonical.insert(record.taxon.clone(), entry.scientific_name.clone());
        }
    }

    let groups = group_by_species(records, &canonical);
    let names: Vec<String> = groups.keys().cloned().collect();
    let skip = if incremental {
        existing_archive_species(output_dir, &names)?
    } else {
        Default::default()
    };

    println!(
        "Normalizing {} species into {}",
        groups.len(),
        output_dir.display()
    );

    let mut details = NormalizeDetails {
        archives_written: 0,
        archives_skipped: 0,
        records_archived: 0,
        total_json_bytes: 0,
        total_gz_bytes: 0,
        archives: Vec::new(),
    };
    for (species, species_records) in &groups {
        if skip.contains(species) {
            details.archives_skipped += 1;
            continue;
        }
        let archive = SpeciesArchive::build(species, species_records)?;
        let (json_path, gz_path) = archive.save(output_dir)?;
        let json_bytes = std::fs::metadata(&json_path)?.len();
        let gz_bytes = std::fs::metadata(&gz_path)?.len();

        details.archives_written += 1;
        details.records_archived += species_records.len() as u64;
        details.total_json_bytes += json_bytes;
        details.total_gz_bytes += gz_bytes;
        details.archives.push(ArchiveEntry {
            species: species.clone(),
            records: species_records.len() as u64,
            taxonomic_entries: archive.lookup_tables.taxonomic.len() as u64,
            locations: archive.lookup_tables.locations.len() as u64,
            json_bytes,
            gz_bytes,
        });
        println!(
            "  {} {} ({} records, {} -> {} bytes)",
            "archived".green(),
            species,
            species_records.len(),
            json_bytes,
            gz_bytes
        );
    }

    let outcome = if incremental && details.archives_skipped > 0 {
        StageOutcome::with_warnings(vec![format!(
            "{} species skipped (existing archives)",
            details.archives_skipped
        )])
    } else {
        StageOutcome::Succeeded
    };

    println!();
    println!("{}", "Normalization Summary:".cyan().bold());
    println!("  Archives written: {}", details.archives_written);
    if details.archives_skipped > 0 {
        println!("  Archives skipped: {}", details.archives_skipped);
    }
    println!("  Records archived: {}", details.records_archived);
    if details.total_json_bytes > 0 {
        println!(
            "  Compression:      {} -> {} bytes ({:.1}%)",
            details.total_json_bytes,
            details.total_gz_bytes,
            (details.total_gz_bytes as f64 / details.total_json_bytes as f64) * 100.0
        );
    }

    let path = RunReport::new("normalize", false, outcome.clone())
        .with_details(&details)?
        .save(report_dir)?;
    println!("  Report:           {}", path.display());

    Ok(outcome)
}
