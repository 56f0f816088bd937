//! Streaming extraction engine
//!
//! Scans a directory of trade database export files (tens of millions of
//! rows in total) and keeps only rows whose taxon matches the species index.
//! Files are independent, so they are processed by a fixed-size worker pool;
//! each worker streams its file in bounded chunks and writes one
//! intermediate artifact, so a crash loses at most one file's progress.
//!
//! Failure semantics: a malformed row is skipped and counted; a file that
//! cannot be opened or read fails only that file's task and is reported in
//! the run statistics.

use crate::record::{normalize_quantity, QuantityIssue, RawTradeRow, TradeRecord};
use crate::species::SpeciesIndex;
use att_common::{AttError, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// How many quantity issues to keep verbatim in the report.
const QUANTITY_ISSUE_SAMPLE: usize = 10;

/// Tunables for the extraction scan.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Rows per chunk; bounds peak memory per worker.
    pub chunk_size: usize,

    /// Concurrent file workers.
    pub workers: usize,

    /// Source file name prefix (e.g. "trade_db_").
    pub file_prefix: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            chunk_size: 50_000,
            workers: 4,
            file_prefix: "trade_db_".to_string(),
        }
    }
}

/// Per-file scan result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStats {
    pub file: String,
    pub records_scanned: u64,
    pub records_matched: u64,
    pub rows_skipped: u64,
    pub species_found: BTreeSet<String>,
    pub quantity_issues: Vec<QuantityIssue>,

    /// Set when the whole file failed (unreadable, bad header).
    pub error: Option<String>,

    /// Artifact path, when any rows matched.
    pub output_file: Option<PathBuf>,
}

/// Aggregate statistics for an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub started_at: String,
    pub finished_at: String,
    pub files_processed: u64,
    pub files_failed: u64,
    pub total_records_scanned: u64,
    pub records_matched: u64,
    pub rows_skipped: u64,

    /// Matched record count per canonical species name.
    pub species_match_counts: BTreeMap<String, u64>,

    /// Registry species with zero matched rows.
    pub species_without_trade: Vec<String>,

    pub total_quantity_issues: u64,
    pub quantity_issue_samples: Vec<QuantityIssue>,
    pub per_file: Vec<FileStats>,
}

impl ExtractionStats {
    /// Share of scanned rows that matched, as a percentage.
    pub fn match_rate(&self) -> f64 {
        if self.total_records_scanned == 0 {
            return 0.0;
        }
        (self.records_matched as f64 / self.total_records_scanned as f64) * 100.0
    }
}

/// List source files under `source_dir` matching the configured prefix,
/// sorted by name for reproducible file numbering.
pub fn list_source_files(source_dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(source_dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(prefix) && name.ends_with(".csv") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(AttError::Config(format!(
            "no '{}*.csv' files found in {}",
            prefix,
            source_dir.display()
        )));
    }
    Ok(files)
}

/// Scan one source file, writing matched rows to a per-file artifact.
///
/// Synchronous by design; the orchestrator runs it on a blocking thread.
/// Row order within the artifact matches the source file.
pub fn process_file(
    path: &Path,
    file_num: usize,
    index: &SpeciesIndex,
    output_dir: &Path,
    chunk_size: usize,
) -> FileStats {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mut stats = FileStats {
        file: file_name.clone(),
        records_scanned: 0,
        records_matched: 0,
        rows_skipped: 0,
        species_found: BTreeSet::new(),
        quantity_issues: Vec::new(),
        error: None,
        output_file: None,
    };

    let mut reader = match csv::Reader::from_path(path) {
        Ok(reader) => reader,
        Err(e) => {
            error!(file = %file_name, error = %e, "Failed to open source file");
            stats.error = Some(e.to_string());
            return stats;
        },
    };

    let mut matched: Vec<TradeRecord> = Vec::new();
    let mut chunk_rows = 0usize;
    let mut chunk_num = 0u64;

    for (i, row) in reader.deserialize::<RawTradeRow>().enumerate() {
        let row_number = (i + 1) as u64;
        stats.records_scanned += 1;
        chunk_rows += 1;

        match row {
            Ok(raw) => {
                if let Some(species) = index.match_taxon(&raw.taxon) {
                    let quantity = normalize_quantity(&raw.quantity, &raw.unit);
                    if let Some(issue) = &quantity.issue {
                        stats.quantity_issues.push(QuantityIssue {
                            taxon: raw.taxon.clone(),
                            file: file_name.clone(),
                            original_quantity: raw.quantity.clone(),
                            unit: raw.unit.clone(),
                            issue: issue.clone(),
                        });
                    }
                    stats
                        .species_found
                        .insert(species.scientific_name.clone());
                    matched.push(TradeRecord::from_raw(
                        raw,
                        quantity.value,
                        &file_name,
                        row_number,
                    ));
                    stats.records_matched += 1;
                }
            },
            Err(e) => {
                // Skippable-row error: count and continue.
                stats.rows_skipped += 1;
                debug!(file = %file_name, row = row_number, error = %e, "Skipping malformed row");
            },
        }

        if chunk_rows >= chunk_size {
            chunk_rows = 0;
            chunk_num += 1;
            if chunk_num % 10 == 0 {
                debug!(
                    file = %file_name,
                    chunk = chunk_num,
                    matched = stats.records_matched,
                    "Chunk progress"
                );
            }
        }
    }

    if !matched.is_empty() {
        let output_path = output_dir.join(format!("arctic_trade_{:02}.csv", file_num));
        match write_artifact(&output_path, &matched) {
            Ok(()) => {
                info!(
                    file = %file_name,
                    matched = stats.records_matched,
                    artifact = %output_path.display(),
                    "Saved per-file extraction artifact"
                );
                stats.output_file = Some(output_path);
            },
            Err(e) => {
                error!(file = %file_name, error = %e, "Failed to write artifact");
                stats.error = Some(e.to_string());
            },
        }
    }

    stats
}

fn failed_file_stats(file: &str, error: &str) -> FileStats {
    FileStats {
        file: file.to_string(),
        records_scanned: 0,
        records_matched: 0,
        rows_skipped: 0,
        species_found: BTreeSet::new(),
        quantity_issues: Vec::new(),
        error: Some(error.to_string()),
        output_file: None,
    }
}

fn write_artifact(path: &Path, records: &[TradeRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Extract matching rows from every source file in `source_dir`.
///
/// Files run concurrently on a bounded worker pool; workers share nothing
/// and return their own `FileStats`, merged here afterward.
pub async fn extract_directory(
    source_dir: &Path,
    output_dir: &Path,
    index: Arc<SpeciesIndex>,
    options: &ExtractOptions,
) -> Result<ExtractionStats> {
    let started_at = Utc::now().to_rfc3339();
    std::fs::create_dir_all(output_dir)?;

    let files = list_source_files(source_dir, &options.file_prefix)?;
    info!(
        files = files.len(),
        workers = options.workers,
        chunk_size = options.chunk_size,
        "Starting extraction"
    );

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{wide_bar:.cyan/blue}] {pos}/{len} files ({eta})")
            .map_err(|e| AttError::Config(e.to_string()))?
            .progress_chars("#>-"),
    );
    progress.set_message("Scanning");

    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut tasks = JoinSet::new();

    for (i, path) in files.into_iter().enumerate() {
        let permit_source = Arc::clone(&semaphore);
        let index = Arc::clone(&index);
        let output_dir = output_dir.to_path_buf();
        let chunk_size = options.chunk_size;
        tasks.spawn(async move {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            let _permit = match permit_source.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return failed_file_stats(&file_name, &e.to_string()),
            };
            let worker = tokio::task::spawn_blocking(move || {
                process_file(&path, i + 1, &index, &output_dir, chunk_size)
            });
            match worker.await {
                Ok(stats) => stats,
                // A panicked worker fails only its own file.
                Err(e) => failed_file_stats(&file_name, &e.to_string()),
            }
        });
    }

    let mut per_file = Vec::new();
    while let Some(result) = tasks.join_next().await {
        let stats = result.map_err(|e| AttError::Parse(format!("worker join error: {}", e)))?;
        progress.inc(1);
        per_file.push(stats);
    }
    progress.finish_with_message("Scan complete");

    // Deterministic report ordering regardless of completion order.
    per_file.sort_by(|a, b| a.file.cmp(&b.file));

    let mut stats = ExtractionStats {
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        files_processed: 0,
        files_failed: 0,
        total_records_scanned: 0,
        records_matched: 0,
        rows_skipped: 0,
        species_match_counts: BTreeMap::new(),
        species_without_trade: Vec::new(),
        total_quantity_issues: 0,
        quantity_issue_samples: Vec::new(),
        per_file: Vec::new(),
    };

    for file in &per_file {
        if file.error.is_some() {
            stats.files_failed += 1;
        } else {
            stats.files_processed += 1;
        }
        stats.total_records_scanned += file.records_scanned;
        stats.records_matched += file.records_matched;
        stats.rows_skipped += file.rows_skipped;
        stats.total_quantity_issues += file.quantity_issues.len() as u64;
        for issue in &file.quantity_issues {
            if stats.quantity_issue_samples.len() < QUANTITY_ISSUE_SAMPLE {
                stats.quantity_issue_samples.push(issue.clone());
            }
        }
    }

    // Per-species counts need the artifacts, since species_found is a set.
    for file in &per_file {
        if let Some(artifact) = &file.output_file {
            let mut reader = csv::Reader::from_path(artifact)?;
            for row in reader.deserialize::<TradeRecord>() {
                let record = row?;
                let canonical = index
                    .match_taxon(&record.taxon)
                    .map(|s| s.scientific_name.clone())
                    .unwrap_or(record.taxon);
                *stats.species_match_counts.entry(canonical).or_insert(0) += 1;
            }
        }
    }

    for entry in index.entries() {
        if !stats
            .species_match_counts
            .contains_key(&entry.scientific_name)
        {
            stats.species_without_trade.push(entry.scientific_name.clone());
        }
    }

    stats.per_file = per_file;

    info!(
        scanned = stats.total_records_scanned,
        matched = stats.records_matched,
        skipped = stats.rows_skipped,
        files_failed = stats.files_failed,
        "Extraction finished"
    );
    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::species::SpeciesEntry;
    use std::io::Write;

    const HEADER: &str = "Id,Year,Appendix,Taxon,Class,Order,Family,Genus,Term,Quantity,Unit,Importer,Exporter,Origin,Purpose,Source,Reporter.type";

    fn write_source(dir: &Path, name: &str, rows: &[&str]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        writeln!(f, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(f, "{}", row).unwrap();
        }
    }

    fn index_for(names: &[&str]) -> Arc<SpeciesIndex> {
        let entries = names
            .iter()
            .map(|n| SpeciesEntry {
                scientific_name: n.to_string(),
                common_name: String::new(),
                class: String::new(),
                species_id: None,
            })
            .collect();
        Arc::new(SpeciesIndex::new(entries, vec![]))
    }

    #[tokio::test]
    async fn test_only_matching_file_produces_rows() {
        // Three source files; only the second contains matches.
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        write_source(
            source.path(),
            "trade_db_1.csv",
            &["1,2020,II,Canis lupus,MAMMALIA,,,,live,1,,US,CA,,T,W,I"],
        );
        let matches: Vec<String> = (0..5)
            .map(|i| {
                format!(
                    "{},202{},II,Ursus maritimus,MAMMALIA,,,,skins,2,,NO,GL,,T,W,I",
                    i + 10,
                    i % 3
                )
            })
            .collect();
        let match_refs: Vec<&str> = matches.iter().map(String::as_str).collect();
        write_source(source.path(), "trade_db_2.csv", &match_refs);
        write_source(
            source.path(),
            "trade_db_3.csv",
            &["99,2021,I,Panthera tigris,MAMMALIA,,,,live,1,,US,IN,,T,W,I"],
        );

        let stats = extract_directory(
            source.path(),
            output.path(),
            index_for(&["Ursus maritimus"]),
            &ExtractOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(stats.records_matched, 5);
        assert_eq!(stats.total_records_scanned, 7);
        assert_eq!(stats.species_match_counts["Ursus maritimus"], 5);

        // Exactly one artifact, tagged to file 2.
        let with_output: Vec<_> = stats
            .per_file
            .iter()
            .filter(|f| f.output_file.is_some())
            .collect();
        assert_eq!(with_output.len(), 1);
        assert_eq!(with_output[0].file, "trade_db_2.csv");

        let mut reader =
            csv::Reader::from_path(with_output[0].output_file.as_ref().unwrap()).unwrap();
        for row in reader.deserialize::<TradeRecord>() {
            let record = row.unwrap();
            assert_eq!(record.source_file, "trade_db_2.csv");
            assert_eq!(record.taxon, "Ursus maritimus");
        }
    }

    #[tokio::test]
    async fn test_malformed_row_is_skipped_not_fatal() {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        write_source(
            source.path(),
            "trade_db_1.csv",
            &[
                "1,2020,II,Ursus maritimus,MAMMALIA,,,,live,1,,US,CA,,T,W,I",
                // Too few columns.
                "broken,row",
                "3,2021,II,Ursus maritimus,MAMMALIA,,,,skins,2,,NO,GL,,T,W,I",
            ],
        );

        let stats = extract_directory(
            source.path(),
            output.path(),
            index_for(&["Ursus maritimus"]),
            &ExtractOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(stats.records_matched, 2);
        assert_eq!(stats.rows_skipped, 1);
        assert_eq!(stats.files_failed, 0);
    }

    #[tokio::test]
    async fn test_species_without_trade_reported() {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_source(
            source.path(),
            "trade_db_1.csv",
            &["1,2020,II,Ursus maritimus,MAMMALIA,,,,live,1,,US,CA,,T,W,I"],
        );

        let stats = extract_directory(
            source.path(),
            output.path(),
            index_for(&["Ursus maritimus", "Monodon monoceros"]),
            &ExtractOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(stats.species_without_trade, vec!["Monodon monoceros"]);
    }

    #[test]
    fn test_unreadable_file_fails_only_itself() {
        let output = tempfile::tempdir().unwrap();
        let index = index_for(&["Ursus maritimus"]);
        let stats = process_file(
            Path::new("/nonexistent/trade_db_1.csv"),
            1,
            &index,
            output.path(),
            50_000,
        );
        assert!(stats.error.is_some());
        assert_eq!(stats.records_scanned, 0);
        assert!(stats.output_file.is_none());
    }

    #[test]
    fn test_list_source_files_rejects_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_source_files(dir.path(), "trade_db_").is_err());
    }

    #[test]
    fn test_row_order_preserved_within_file() {
        let source = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let rows: Vec<String> = (0..20)
            .map(|i| format!("{},2020,II,Ursus maritimus,MAMMALIA,,,,live,1,,US,CA,,T,W,I", i))
            .collect();
        let row_refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        write_source(source.path(), "trade_db_1.csv", &row_refs);

        let index = index_for(&["Ursus maritimus"]);
        let stats = process_file(
            &source.path().join("trade_db_1.csv"),
            1,
            &index,
            output.path(),
            4, // tiny chunks to exercise chunk accounting
        );

        assert_eq!(stats.records_matched, 20);
        let mut reader = csv::Reader::from_path(stats.output_file.unwrap()).unwrap();
        let numbers: Vec<u64> = reader
            .deserialize::<TradeRecord>()
            .map(|r| r.unwrap().row_number)
            .collect();
        let sorted = {
            let mut s = numbers.clone();
            s.sort_unstable();
            s
        };
        assert_eq!(numbers, sorted);
    }
}
