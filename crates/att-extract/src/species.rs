//! Species matcher
//!
//! Holds the fixed set of species the pipeline cares about and answers
//! membership queries during extraction. The index is built once from the
//! species list CSV plus an optional synonym override file, then treated as
//! immutable for the duration of the run.
//!
//! The override file is data, not code: the transaction source sometimes
//! uses a taxonomic synonym the registry does not (the registry keeps
//! `Nyctea scandiaca` while newer exports say `Bubo scandiacus`). Keeping
//! those mappings in a reviewable JSON file means a curator can fix a
//! mismatch without touching the matcher.

use att_common::{AttError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

/// One species of interest, as loaded from the registry list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesEntry {
    pub scientific_name: String,

    #[serde(default)]
    pub common_name: String,

    #[serde(default)]
    pub class: String,

    /// Registry id, when the species is already present in the database.
    #[serde(default)]
    pub species_id: Option<Uuid>,
}

/// Synonym override: a taxon name used by the transaction source mapped to
/// the canonical name the registry knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynonymOverride {
    pub source_name: String,
    pub canonical_name: String,

    #[serde(default)]
    pub note: String,
}

/// Immutable hash index over canonical names, aliases, and overrides.
#[derive(Debug, Clone)]
pub struct SpeciesIndex {
    entries: Vec<SpeciesEntry>,
    by_name: HashMap<String, usize>,
}

impl SpeciesIndex {
    /// Build an index from species entries and synonym overrides.
    ///
    /// Overrides that point at an unknown canonical name are skipped with a
    /// warning rather than rejected: the override file is maintained by hand
    /// and a stale line must not block an extraction run.
    pub fn new(entries: Vec<SpeciesEntry>, overrides: Vec<SynonymOverride>) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len() * 2);
        for (i, entry) in entries.iter().enumerate() {
            by_name.insert(entry.scientific_name.clone(), i);
        }

        for synonym in overrides {
            match by_name.get(&synonym.canonical_name).copied() {
                Some(i) => {
                    by_name.entry(synonym.source_name).or_insert(i);
                },
                None => {
                    warn!(
                        source_name = %synonym.source_name,
                        canonical_name = %synonym.canonical_name,
                        "Synonym override targets unknown species, skipping"
                    );
                },
            }
        }

        Self { entries, by_name }
    }

    /// Load from a species list CSV (`scientific_name,common_name,class,
    /// species_id` header) and an optional overrides JSON file.
    pub fn load(species_file: &Path, overrides_file: Option<&Path>) -> Result<Self> {
        let mut reader = csv::Reader::from_path(species_file).map_err(|e| {
            AttError::Registry(format!(
                "cannot open species list {}: {}",
                species_file.display(),
                e
            ))
        })?;

        let mut entries = Vec::new();
        for row in reader.deserialize::<SpeciesEntry>() {
            let entry = row?;
            if !entry.scientific_name.trim().is_empty() {
                entries.push(entry);
            }
        }

        if entries.is_empty() {
            return Err(AttError::Registry(format!(
                "species list {} contains no entries",
                species_file.display()
            )));
        }

        let overrides = match overrides_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str::<Vec<SynonymOverride>>(&text)?
            },
            None => Vec::new(),
        };

        info!(
            species = entries.len(),
            overrides = overrides.len(),
            "Loaded species registry list"
        );
        Ok(Self::new(entries, overrides))
    }

    /// Match a taxon field against the index. O(1) expected; no side effects.
    pub fn match_taxon(&self, taxon: &str) -> Option<&SpeciesEntry> {
        self.by_name.get(taxon).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, taxon: &str) -> bool {
        self.by_name.contains_key(taxon)
    }

    /// All canonical species entries, in list order.
    pub fn entries(&self) -> &[SpeciesEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_entries() -> Vec<SpeciesEntry> {
        vec![
            SpeciesEntry {
                scientific_name: "Ursus maritimus".to_string(),
                common_name: "Polar Bear".to_string(),
                class: "MAMMALIA".to_string(),
                species_id: Some(Uuid::new_v4()),
            },
            SpeciesEntry {
                scientific_name: "Nyctea scandiaca".to_string(),
                common_name: "Snowy Owl".to_string(),
                class: "AVES".to_string(),
                species_id: None,
            },
        ]
    }

    #[test]
    fn test_canonical_match() {
        let index = SpeciesIndex::new(sample_entries(), vec![]);
        let hit = index.match_taxon("Ursus maritimus").unwrap();
        assert_eq!(hit.common_name, "Polar Bear");
        assert!(index.match_taxon("Canis lupus").is_none());
    }

    #[test]
    fn test_synonym_override_resolves_to_canonical() {
        let overrides = vec![SynonymOverride {
            source_name: "Bubo scandiacus".to_string(),
            canonical_name: "Nyctea scandiaca".to_string(),
            note: "accepted name changed; registry keeps the old one".to_string(),
        }];
        let index = SpeciesIndex::new(sample_entries(), overrides);

        let hit = index.match_taxon("Bubo scandiacus").unwrap();
        assert_eq!(hit.scientific_name, "Nyctea scandiaca");
        // Canonical name still matches too.
        assert!(index.contains("Nyctea scandiaca"));
    }

    #[test]
    fn test_override_to_unknown_species_is_skipped() {
        let overrides = vec![SynonymOverride {
            source_name: "Foo bar".to_string(),
            canonical_name: "Not in list".to_string(),
            note: String::new(),
        }];
        let index = SpeciesIndex::new(sample_entries(), overrides);
        assert!(index.match_taxon("Foo bar").is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_override_never_shadows_canonical_name() {
        // An override whose source name collides with a canonical name must
        // not redirect it.
        let overrides = vec![SynonymOverride {
            source_name: "Ursus maritimus".to_string(),
            canonical_name: "Nyctea scandiaca".to_string(),
            note: String::new(),
        }];
        let index = SpeciesIndex::new(sample_entries(), overrides);
        let hit = index.match_taxon("Ursus maritimus").unwrap();
        assert_eq!(hit.common_name, "Polar Bear");
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let species_path = dir.path().join("species.csv");
        let mut f = std::fs::File::create(&species_path).unwrap();
        writeln!(f, "scientific_name,common_name,class,species_id").unwrap();
        writeln!(f, "Ursus maritimus,Polar Bear,MAMMALIA,").unwrap();
        writeln!(f, "Monodon monoceros,Narwhal,MAMMALIA,").unwrap();

        let overrides_path = dir.path().join("overrides.json");
        std::fs::write(
            &overrides_path,
            r#"[{"source_name": "Monodon monocerus", "canonical_name": "Monodon monoceros"}]"#,
        )
        .unwrap();

        let index = SpeciesIndex::load(&species_path, Some(&overrides_path)).unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains("Monodon monocerus"));
    }

    #[test]
    fn test_load_empty_list_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let species_path = dir.path().join("species.csv");
        std::fs::write(&species_path, "scientific_name,common_name,class,species_id\n").unwrap();
        assert!(SpeciesIndex::load(&species_path, None).is_err());
    }
}
