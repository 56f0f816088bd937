//! Consolidation of per-file extraction artifacts
//!
//! Reads every `arctic_trade_*.csv` artifact produced by the extraction
//! scan, concatenates them, sorts by (year, taxon) for a deterministic
//! ordering, and writes one combined file plus a per-species coverage
//! summary. Rows without a year sort first.

use crate::record::TradeRecord;
use att_common::{AttError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const COMBINED_FILE: &str = "arctic_trade_combined.csv";
pub const SUMMARY_FILE: &str = "consolidation_summary.json";

/// Coverage summary for one taxon across the combined dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesSummary {
    pub taxon: String,
    pub record_count: u64,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,

    /// Sum of normalized quantities; rows with no parseable quantity are
    /// excluded rather than treated as zero.
    pub total_quantity: f64,
}

/// Result of a consolidation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSummary {
    pub artifacts_read: u64,
    pub total_records: u64,
    pub species: Vec<SpeciesSummary>,
}

/// List `arctic_trade_*.csv` artifacts in name order.
pub fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("arctic_trade_")
            && name.ends_with(".csv")
            && name != COMBINED_FILE
            && entry.path().is_file()
        {
            files.push(entry.path());
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(AttError::Archive(format!(
            "no extraction artifacts found in {}",
            dir.display()
        )));
    }
    Ok(files)
}

fn record_order(a: &TradeRecord, b: &TradeRecord) -> Ordering {
    match (a.year, b.year) {
        (None, None) => a.taxon.cmp(&b.taxon),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.taxon.cmp(&b.taxon)),
    }
}

/// Sort records into canonical (year, taxon) order. Stable, so equal keys
/// keep their artifact order.
pub fn sort_records(records: &mut [TradeRecord]) {
    records.sort_by(record_order);
}

/// Compute per-species coverage over a record set.
pub fn summarize(records: &[TradeRecord]) -> Vec<SpeciesSummary> {
    let mut by_taxon: BTreeMap<&str, SpeciesSummary> = BTreeMap::new();
    for record in records {
        let entry = by_taxon
            .entry(record.taxon.as_str())
            .or_insert_with(|| SpeciesSummary {
                taxon: record.taxon.clone(),
                record_count: 0,
                min_year: None,
                max_year: None,
                total_quantity: 0.0,
            });
        entry.record_count += 1;
        if let Some(year) = record.year {
            entry.min_year = Some(entry.min_year.map_or(year, |m| m.min(year)));
            entry.max_year = Some(entry.max_year.map_or(year, |m| m.max(year)));
        }
        if let Some(quantity) = record.quantity_normalized {
            entry.total_quantity += quantity;
        }
    }
    by_taxon.into_values().collect()
}

/// Consolidate all artifacts under `dir` into one combined CSV plus a
/// summary JSON, both written back into `dir`.
pub fn consolidate_artifacts(dir: &Path) -> Result<ConsolidationSummary> {
    let artifacts = list_artifacts(dir)?;

    let mut records: Vec<TradeRecord> = Vec::new();
    for artifact in &artifacts {
        let mut reader = csv::Reader::from_path(artifact)?;
        for row in reader.deserialize::<TradeRecord>() {
            records.push(row?);
        }
    }

    sort_records(&mut records);

    let combined_path = dir.join(COMBINED_FILE);
    let mut writer = csv::Writer::from_path(&combined_path)?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    let summary = ConsolidationSummary {
        artifacts_read: artifacts.len() as u64,
        total_records: records.len() as u64,
        species: summarize(&records),
    };
    let summary_path = dir.join(SUMMARY_FILE);
    std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;

    info!(
        artifacts = summary.artifacts_read,
        records = summary.total_records,
        species = summary.species.len(),
        combined = %combined_path.display(),
        "Consolidated extraction artifacts"
    );
    Ok(summary)
}

/// Read the combined dataset back.
pub fn read_combined(dir: &Path) -> Result<Vec<TradeRecord>> {
    let path = dir.join(COMBINED_FILE);
    let mut reader = csv::Reader::from_path(&path).map_err(|e| {
        AttError::Archive(format!("cannot open combined file {}: {}", path.display(), e))
    })?;
    let mut records = Vec::new();
    for row in reader.deserialize::<TradeRecord>() {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record::RawTradeRow;

    fn record(taxon: &str, year: Option<i32>, quantity: Option<f64>) -> TradeRecord {
        let raw = RawTradeRow {
            id: "1".to_string(),
            year: year.map(|y| y.to_string()).unwrap_or_default(),
            appendix: "II".to_string(),
            taxon: taxon.to_string(),
            class: "MAMMALIA".to_string(),
            order: String::new(),
            family: String::new(),
            genus: String::new(),
            term: "skins".to_string(),
            quantity: quantity.map(|q| q.to_string()).unwrap_or_default(),
            unit: String::new(),
            importer: "US".to_string(),
            exporter: "CA".to_string(),
            origin: String::new(),
            purpose: "T".to_string(),
            source: "W".to_string(),
            reporter_type: "I".to_string(),
        };
        TradeRecord::from_raw(raw, quantity, "trade_db_1.csv", 1)
    }

    #[test]
    fn test_sort_orders_by_year_then_taxon() {
        let mut records = vec![
            record("Ursus maritimus", Some(2020), None),
            record("Balaena mysticetus", Some(2020), None),
            record("Ursus maritimus", Some(1999), None),
            record("Ursus maritimus", None, None),
        ];
        sort_records(&mut records);
        assert_eq!(records[0].year, None);
        assert_eq!(records[1].year, Some(1999));
        assert_eq!(records[2].taxon, "Balaena mysticetus");
        assert_eq!(records[3].taxon, "Ursus maritimus");
    }

    #[test]
    fn test_summarize_counts_and_year_range() {
        let records = vec![
            record("Ursus maritimus", Some(2001), Some(3.0)),
            record("Ursus maritimus", Some(1998), Some(2.5)),
            record("Ursus maritimus", None, None),
            record("Monodon monoceros", Some(2010), Some(1.0)),
        ];
        let summary = summarize(&records);
        assert_eq!(summary.len(), 2);

        let bear = summary.iter().find(|s| s.taxon == "Ursus maritimus").unwrap();
        assert_eq!(bear.record_count, 3);
        assert_eq!(bear.min_year, Some(1998));
        assert_eq!(bear.max_year, Some(2001));
        assert!((bear.total_quantity - 5.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_consolidate_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        let mut w = csv::Writer::from_path(dir.path().join("arctic_trade_01.csv")).unwrap();
        w.serialize(record("Ursus maritimus", Some(2020), Some(1.0))).unwrap();
        w.flush().unwrap();
        let mut w = csv::Writer::from_path(dir.path().join("arctic_trade_02.csv")).unwrap();
        w.serialize(record("Ursus maritimus", Some(2005), Some(2.0))).unwrap();
        w.flush().unwrap();

        let summary = consolidate_artifacts(dir.path()).unwrap();
        assert_eq!(summary.artifacts_read, 2);
        assert_eq!(summary.total_records, 2);

        let combined = read_combined(dir.path()).unwrap();
        assert_eq!(combined.len(), 2);
        assert_eq!(combined[0].year, Some(2005));
    }

    #[test]
    fn test_consolidate_empty_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(consolidate_artifacts(dir.path()).is_err());
    }

    #[test]
    fn test_consolidation_is_deterministic() {
        let mut a = vec![
            record("Ursus maritimus", Some(2020), None),
            record("Monodon monoceros", Some(2020), None),
        ];
        let mut b = a.clone();
        b.reverse();
        sort_records(&mut a);
        sort_records(&mut b);
        assert_eq!(a, b);
    }
}
