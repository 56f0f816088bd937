//! Dictionary-encoded normalization
//!
//! Trade records are highly repetitive: a species has a handful of
//! taxonomic combinations, a few dozen trading partners, and small
//! categorical vocabularies. Normalization factors those into sorted lookup
//! tables and rewrites each record as indices, with absent fields omitted
//! entirely. The transform is exact: `denormalize(normalize(records))`
//! reproduces the input records byte for byte, with "" meaning "not
//! reported" throughout.
//!
//! Tables are built from sorted distinct values, so the same input always
//! produces identical output regardless of record order within the input.

use crate::record::TradeRecord;
use att_common::{AttError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One distinct taxonomic combination seen in the data. A species can carry
/// more than one (synonym spellings, split appendix listings).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaxonomicEntry {
    pub taxon: String,
    pub appendix: String,
    pub class: String,
    pub order: String,
    pub family: String,
    pub genus: String,
}

/// Dictionary tables shared by every record in an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupTables {
    pub taxonomic: Vec<TaxonomicEntry>,

    /// Union of importer, exporter, and origin codes.
    pub locations: Vec<String>,

    pub terms: Vec<String>,
    pub purposes: Vec<String>,
    pub sources: Vec<String>,
    pub reporter_types: Vec<String>,
    pub units: Vec<String>,
    pub source_files: Vec<String>,
}

/// One record in dictionary-encoded form. `None` fields are omitted from
/// the serialized output and mean "not reported".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    /// Index into `LookupTables::taxonomic`.
    pub taxonomic: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importer: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exporter: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_type: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_raw: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_normalized: Option<f64>,

    pub source_file: u32,
    pub row_number: u64,
}

fn sorted_distinct<'a, I: Iterator<Item = &'a str>>(values: I) -> Vec<String> {
    let set: BTreeSet<&str> = values.filter(|v| !v.is_empty()).collect();
    set.into_iter().map(str::to_string).collect()
}

fn index_of(table: &[String]) -> HashMap<&str, u32> {
    table
        .iter()
        .enumerate()
        .map(|(i, v)| (v.as_str(), i as u32))
        .collect()
}

fn lookup(map: &HashMap<&str, u32>, value: &str, table: &str) -> Result<Option<u32>> {
    if value.is_empty() {
        return Ok(None);
    }
    match map.get(value) {
        Some(&i) => Ok(Some(i)),
        None => Err(AttError::Archive(format!(
            "value {:?} missing from {} lookup table",
            value, table
        ))),
    }
}

fn resolve<'a>(table: &'a [String], index: Option<u32>, name: &str) -> Result<&'a str> {
    match index {
        None => Ok(""),
        Some(i) => table.get(i as usize).map(String::as_str).ok_or_else(|| {
            AttError::Archive(format!("index {} out of range for {} table", i, name))
        }),
    }
}

/// Build lookup tables from a record set. Deterministic: tables contain the
/// sorted distinct values, so record order does not matter.
pub fn build_tables(records: &[TradeRecord]) -> LookupTables {
    let taxonomic_set: BTreeSet<TaxonomicEntry> = records
        .iter()
        .map(|r| TaxonomicEntry {
            taxon: r.taxon.clone(),
            appendix: r.appendix.clone(),
            class: r.class.clone(),
            order: r.order.clone(),
            family: r.family.clone(),
            genus: r.genus.clone(),
        })
        .collect();

    LookupTables {
        taxonomic: taxonomic_set.into_iter().collect(),
        locations: sorted_distinct(
            records
                .iter()
                .flat_map(|r| [r.importer.as_str(), r.exporter.as_str(), r.origin.as_str()]),
        ),
        terms: sorted_distinct(records.iter().map(|r| r.term.as_str())),
        purposes: sorted_distinct(records.iter().map(|r| r.purpose.as_str())),
        sources: sorted_distinct(records.iter().map(|r| r.source.as_str())),
        reporter_types: sorted_distinct(records.iter().map(|r| r.reporter_type.as_str())),
        units: sorted_distinct(records.iter().map(|r| r.unit.as_str())),
        source_files: sorted_distinct(records.iter().map(|r| r.source_file.as_str())),
    }
}

/// Dictionary-encode a record set. Record order is preserved.
pub fn normalize(records: &[TradeRecord]) -> Result<(LookupTables, Vec<NormalizedRecord>)> {
    let tables = build_tables(records);

    let taxonomic_index: HashMap<&TaxonomicEntry, u32> = tables
        .taxonomic
        .iter()
        .enumerate()
        .map(|(i, e)| (e, i as u32))
        .collect();
    let locations = index_of(&tables.locations);
    let terms = index_of(&tables.terms);
    let purposes = index_of(&tables.purposes);
    let sources = index_of(&tables.sources);
    let reporter_types = index_of(&tables.reporter_types);
    let units = index_of(&tables.units);
    let source_files = index_of(&tables.source_files);

    let mut normalized = Vec::with_capacity(records.len());
    for record in records {
        let entry = TaxonomicEntry {
            taxon: record.taxon.clone(),
            appendix: record.appendix.clone(),
            class: record.class.clone(),
            order: record.order.clone(),
            family: record.family.clone(),
            genus: record.genus.clone(),
        };
        let taxonomic = *taxonomic_index.get(&entry).ok_or_else(|| {
            AttError::Archive(format!(
                "taxonomic combination for {:?} missing from table",
                record.taxon
            ))
        })?;
        let source_file = lookup(&source_files, &record.source_file, "source_files")?
            .ok_or_else(|| AttError::Archive("record has empty source_file".to_string()))?;

        normalized.push(NormalizedRecord {
            id: record.id.clone(),
            year: record.year,
            taxonomic,
            importer: lookup(&locations, &record.importer, "locations")?,
            exporter: lookup(&locations, &record.exporter, "locations")?,
            origin: lookup(&locations, &record.origin, "locations")?,
            term: lookup(&terms, &record.term, "terms")?,
            purpose: lookup(&purposes, &record.purpose, "purposes")?,
            source: lookup(&sources, &record.source, "sources")?,
            reporter_type: lookup(&reporter_types, &record.reporter_type, "reporter_types")?,
            unit: lookup(&units, &record.unit, "units")?,
            quantity_raw: if record.quantity_raw.is_empty() {
                None
            } else {
                Some(record.quantity_raw.clone())
            },
            quantity_normalized: record.quantity_normalized,
            source_file,
            row_number: record.row_number,
        });
    }

    debug!(
        records = normalized.len(),
        taxonomic = tables.taxonomic.len(),
        locations = tables.locations.len(),
        "Normalized record set"
    );
    Ok((tables, normalized))
}

/// Invert the dictionary encoding. Every index must resolve; a dangling
/// index means the archive is corrupt and the whole call fails.
pub fn denormalize(
    tables: &LookupTables,
    normalized: &[NormalizedRecord],
) -> Result<Vec<TradeRecord>> {
    let mut records = Vec::with_capacity(normalized.len());
    for n in normalized {
        let taxonomic = tables.taxonomic.get(n.taxonomic as usize).ok_or_else(|| {
            AttError::Archive(format!(
                "taxonomic index {} out of range ({} entries)",
                n.taxonomic,
                tables.taxonomic.len()
            ))
        })?;
        let source_file =
            resolve(&tables.source_files, Some(n.source_file), "source_files")?.to_string();

        records.push(TradeRecord {
            id: n.id.clone(),
            year: n.year,
            appendix: taxonomic.appendix.clone(),
            taxon: taxonomic.taxon.clone(),
            class: taxonomic.class.clone(),
            order: taxonomic.order.clone(),
            family: taxonomic.family.clone(),
            genus: taxonomic.genus.clone(),
            term: resolve(&tables.terms, n.term, "terms")?.to_string(),
            quantity_raw: n.quantity_raw.clone().unwrap_or_default(),
            quantity_normalized: n.quantity_normalized,
            unit: resolve(&tables.units, n.unit, "units")?.to_string(),
            importer: resolve(&tables.locations, n.importer, "locations")?.to_string(),
            exporter: resolve(&tables.locations, n.exporter, "locations")?.to_string(),
            origin: resolve(&tables.locations, n.origin, "locations")?.to_string(),
            purpose: resolve(&tables.purposes, n.purpose, "purposes")?.to_string(),
            source: resolve(&tables.sources, n.source, "sources")?.to_string(),
            reporter_type: resolve(&tables.reporter_types, n.reporter_type, "reporter_types")?
                .to_string(),
            source_file,
            row_number: n.row_number,
        });
    }
    Ok(records)
}

/// Denormalize and compare against the originals. Called before an archive
/// is written; a mismatch aborts the write.
pub fn verify_round_trip(
    original: &[TradeRecord],
    tables: &LookupTables,
    normalized: &[NormalizedRecord],
) -> Result<()> {
    let restored = denormalize(tables, normalized)?;
    if restored.len() != original.len() {
        return Err(AttError::Archive(format!(
            "round-trip length mismatch: {} in, {} out",
            original.len(),
            restored.len()
        )));
    }
    for (i, (a, b)) in original.iter().zip(restored.iter()).enumerate() {
        if a != b {
            return Err(AttError::Archive(format!(
                "round-trip mismatch at record {} (id {:?})",
                i, a.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record::RawTradeRow;

    fn record(
        id: &str,
        taxon: &str,
        appendix: &str,
        importer: &str,
        term: &str,
        quantity: &str,
    ) -> TradeRecord {
        let raw = RawTradeRow {
            id: id.to_string(),
            year: "2015".to_string(),
            appendix: appendix.to_string(),
            taxon: taxon.to_string(),
            class: "MAMMALIA".to_string(),
            order: "CARNIVORA".to_string(),
            family: "URSIDAE".to_string(),
            genus: "Ursus".to_string(),
            term: term.to_string(),
            quantity: quantity.to_string(),
            unit: String::new(),
            importer: importer.to_string(),
            exporter: "CA".to_string(),
            origin: String::new(),
            purpose: "T".to_string(),
            source: "W".to_string(),
            reporter_type: "I".to_string(),
        };
        let value = quantity.parse().ok();
        TradeRecord::from_raw(raw, value, "trade_db_1.csv", 1)
    }

    fn sample() -> Vec<TradeRecord> {
        vec![
            record("1", "Ursus maritimus", "II", "US", "skins", "3"),
            record("2", "Ursus maritimus", "II", "NO", "live", ""),
            record("3", "Ursus maritimus", "I", "US", "skins", "1"),
        ]
    }

    #[test]
    fn test_round_trip_is_exact() {
        let records = sample();
        let (tables, normalized) = normalize(&records).unwrap();
        let restored = denormalize(&tables, &normalized).unwrap();
        assert_eq!(records, restored);
        verify_round_trip(&records, &tables, &normalized).unwrap();
    }

    #[test]
    fn test_tables_are_sorted_and_distinct() {
        let (tables, _) = normalize(&sample()).unwrap();
        assert_eq!(tables.locations, vec!["CA", "NO", "US"]);
        assert_eq!(tables.terms, vec!["live", "skins"]);
        // Split listing: same taxon under two appendices is two entries.
        assert_eq!(tables.taxonomic.len(), 2);
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let (_, normalized) = normalize(&sample()).unwrap();
        // Record 2 has no quantity, no unit, no origin.
        let n = &normalized[1];
        assert!(n.quantity_raw.is_none());
        assert!(n.unit.is_none());
        assert!(n.origin.is_none());

        let json = serde_json::to_string(n).unwrap();
        assert!(!json.contains("quantity_raw"));
        assert!(!json.contains("origin"));
    }

    #[test]
    fn test_normalization_is_deterministic_across_orderings() {
        let records = sample();
        let mut reversed = records.clone();
        reversed.reverse();

        let (tables_a, _) = normalize(&records).unwrap();
        let (tables_b, _) = normalize(&reversed).unwrap();
        assert_eq!(tables_a, tables_b);
        assert_eq!(
            serde_json::to_string(&tables_a).unwrap(),
            serde_json::to_string(&tables_b).unwrap()
        );
    }

    #[test]
    fn test_dangling_index_is_rejected() {
        let (tables, mut normalized) = normalize(&sample()).unwrap();
        normalized[0].importer = Some(99);
        assert!(denormalize(&tables, &normalized).is_err());
    }

    #[test]
    fn test_empty_record_set() {
        let (tables, normalized) = normalize(&[]).unwrap();
        assert!(tables.taxonomic.is_empty());
        assert!(normalized.is_empty());
        assert!(denormalize(&tables, &normalized).unwrap().is_empty());
    }
}
