//! Per-species archive files
//!
//! The normalization stage emits one archive per species, in two renditions
//! with identical content: a plain `.json` for inspection and a `.json.gz`
//! for storage. The reader picks the codec from the file extension.
//!
//! Archives carry a format version; the loader refuses versions it does not
//! understand instead of guessing.

use crate::consolidate::{summarize, SpeciesSummary};
use crate::normalize::{self, LookupTables, NormalizedRecord};
use crate::record::TradeRecord;
use att_common::{AttError, Result};
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Current archive format. Bumped when the on-disk layout changes shape.
pub const FORMAT_VERSION: &str = "2.0";

const ARCHIVE_SUFFIX: &str = "_trade_data_optimized";

/// Run metadata embedded in every archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub created_at: String,
    pub original_records: u64,
    pub source_files: Vec<String>,

    /// Plain JSON size in bytes; filled in after serialization.
    #[serde(default)]
    pub uncompressed_bytes: u64,
}

/// Everything the downstream loader needs for one species.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesArchive {
    pub format_version: String,
    pub species: String,
    pub lookup_tables: LookupTables,
    pub summary: SpeciesSummary,
    pub records: Vec<NormalizedRecord>,
    pub metadata: ArchiveMetadata,
}

impl SpeciesArchive {
    /// Normalize one species' records into an archive. The round trip is
    /// verified before the archive is returned, and the summary computed
    /// from the normalized form is cross-checked against the raw records.
    pub fn build(species: &str, records: &[TradeRecord]) -> Result<Self> {
        let (lookup_tables, normalized) = normalize::normalize(records)?;
        normalize::verify_round_trip(records, &lookup_tables, &normalized)?;

        let restored = normalize::denormalize(&lookup_tables, &normalized)?;
        let from_normalized = summarize(&restored);
        let from_raw = summarize(records);
        if from_normalized != from_raw {
            return Err(AttError::Archive(format!(
                "summary mismatch between raw and normalized records for {}",
                species
            )));
        }

        let summary = collapse_summary(species, from_normalized, records.len() as u64)?;
        let source_files: BTreeSet<String> =
            records.iter().map(|r| r.source_file.clone()).collect();

        Ok(Self {
            format_version: FORMAT_VERSION.to_string(),
            species: species.to_string(),
            lookup_tables,
            summary,
            records: normalized,
            metadata: ArchiveMetadata {
                created_at: Utc::now().to_rfc3339(),
                original_records: records.len() as u64,
                source_files: source_files.into_iter().collect(),
                uncompressed_bytes: 0,
            },
        })
    }

    /// Restore the original trade records.
    pub fn denormalized(&self) -> Result<Vec<TradeRecord>> {
        normalize::denormalize(&self.lookup_tables, &self.records)
    }

    /// Write the `.json` and `.json.gz` renditions. Returns both paths.
    pub fn save(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let stem = format!("{}{}", safe_filename(&self.species), ARCHIVE_SUFFIX);

        let mut archive = self.clone();
        // Serialize once to learn the size, then again with it recorded.
        archive.metadata.uncompressed_bytes = serde_json::to_vec(&archive)?.len() as u64;
        let json = serde_json::to_vec_pretty(&archive)?;

        let json_path = dir.join(format!("{}.json", stem));
        std::fs::write(&json_path, &json)?;

        let gz_path = dir.join(format!("{}.json.gz", stem));
        let file = std::fs::File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&json)?;
        encoder.finish()?;

        let compressed = std::fs::metadata(&gz_path)?.len();
        info!(
            species = %self.species,
            records = self.records.len(),
            json_bytes = json.len(),
            gz_bytes = compressed,
            "Saved species archive"
        );
        Ok((json_path, gz_path))
    }

    /// Read an archive; gzip is detected from the `.gz` extension.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| AttError::Archive(format!("cannot open {}: {}", path.display(), e)))?;

        let archive: SpeciesArchive = if path.extension().is_some_and(|e| e == "gz") {
            let mut text = String::new();
            GzDecoder::new(file).read_to_string(&mut text)?;
            serde_json::from_str(&text)?
        } else {
            serde_json::from_reader(std::io::BufReader::new(file))?
        };

        if archive.format_version != FORMAT_VERSION {
            return Err(AttError::FormatVersion(format!(
                "{} (expected {})",
                archive.format_version, FORMAT_VERSION
            )));
        }
        Ok(archive)
    }
}

fn collapse_summary(
    species: &str,
    mut per_taxon: Vec<SpeciesSummary>,
    record_count: u64,
) -> Result<SpeciesSummary> {
    // Synonym spellings collapse into one summary under the canonical name.
    let mut merged = SpeciesSummary {
        taxon: species.to_string(),
        record_count: 0,
        min_year: None,
        max_year: None,
        total_quantity: 0.0,
    };
    for s in per_taxon.drain(..) {
        merged.record_count += s.record_count;
        merged.min_year = match (merged.min_year, s.min_year) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        merged.max_year = match (merged.max_year, s.max_year) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        merged.total_quantity += s.total_quantity;
    }
    if merged.record_count != record_count {
        return Err(AttError::Archive(format!(
            "summary for {} counts {} records, expected {}",
            species, merged.record_count, record_count
        )));
    }
    Ok(merged)
}

/// Turn a species name into a filesystem-safe stem: spaces become
/// underscores, anything outside alphanumerics, `_`, and `-` is dropped.
pub fn safe_filename(species: &str) -> String {
    species
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Group records by canonical species name. Records whose taxon is not in
/// `canonical` are grouped under the mapped name when a mapping exists, or
/// under their own taxon otherwise.
pub fn group_by_species(
    records: Vec<TradeRecord>,
    canonical: &BTreeMap<String, String>,
) -> BTreeMap<String, Vec<TradeRecord>> {
    let mut groups: BTreeMap<String, Vec<TradeRecord>> = BTreeMap::new();
    for record in records {
        let key = canonical
            .get(&record.taxon)
            .cloned()
            .unwrap_or_else(|| record.taxon.clone());
        groups.entry(key).or_default().push(record);
    }
    groups
}

/// Species that already have a gzipped archive under `dir`. Used by
/// incremental runs to skip species that are already covered.
pub fn existing_archive_species(dir: &Path, species: &[String]) -> Result<BTreeSet<String>> {
    let mut present = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(present);
    }
    for name in species {
        let stem = format!("{}{}", safe_filename(name), ARCHIVE_SUFFIX);
        if dir.join(format!("{}.json.gz", stem)).is_file()
            || dir.join(format!("{}.json", stem)).is_file()
        {
            present.insert(name.clone());
        }
    }
    if !present.is_empty() {
        warn!(
            existing = present.len(),
            "Skipping species with existing archives (incremental mode)"
        );
    }
    Ok(present)
}
