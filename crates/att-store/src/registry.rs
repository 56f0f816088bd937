//! Species registry snapshot
//!
//! The registry's name-to-id mapping is loaded once at the start of a run
//! and then only read. Stages take it by shared reference; nothing mutates
//! it mid-run, so two stages can never disagree about a species id.

use crate::config::SPECIES_TABLE;
use crate::error::{Result, StoreError};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

const PAGE_SIZE: i64 = 1_000;

/// Read-only name → id mapping for the species registry.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    by_name: HashMap<String, Uuid>,
}

impl RegistrySnapshot {
    /// Build directly from pairs. Used by tests and by callers that already
    /// hold the mapping.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Uuid)>) -> Self {
        Self {
            by_name: pairs.into_iter().collect(),
        }
    }

    /// Load the full registry, paginated so a large table never needs a
    /// single oversized result set.
    pub async fn load(pool: &PgPool) -> Result<Self> {
        let mut by_name = HashMap::new();
        let mut offset: i64 = 0;
        loop {
            let query = format!(
                "SELECT id, scientific_name FROM {} ORDER BY scientific_name LIMIT $1 OFFSET $2",
                SPECIES_TABLE
            );
            let rows = sqlx::query(&query)
                .bind(PAGE_SIZE)
                .bind(offset)
                .fetch_all(pool)
                .await?;
            let page_len = rows.len();
            for row in rows {
                let id: Uuid = row.try_get("id")?;
                let name: String = row.try_get("scientific_name")?;
                by_name.insert(name, id);
            }
            if (page_len as i64) < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }

        if by_name.is_empty() {
            return Err(StoreError::Registry(
                "species registry is empty; seed it before loading trade data".to_string(),
            ));
        }
        info!(species = by_name.len(), "Loaded registry snapshot");
        Ok(Self { by_name })
    }

    /// Add an alias resolving to the same id as `canonical`. Unknown
    /// canonical names are skipped with a warning, and an alias never
    /// shadows an existing canonical name.
    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        match self.by_name.get(canonical).copied() {
            Some(id) => {
                self.by_name.entry(alias.to_string()).or_insert(id);
            },
            None => {
                warn!(alias, canonical, "Alias targets unknown species, skipping");
            },
        }
    }

    pub fn lookup(&self, scientific_name: &str) -> Option<Uuid> {
        self.by_name.get(scientific_name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registry ids, for narrowing production scans.
    pub fn ids(&self) -> Vec<Uuid> {
        self.by_name.values().copied().collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_alias() {
        let id = Uuid::new_v4();
        let mut snapshot =
            RegistrySnapshot::from_pairs([("Nyctea scandiaca".to_string(), id)]);

        snapshot.add_alias("Bubo scandiacus", "Nyctea scandiaca");
        assert_eq!(snapshot.lookup("Bubo scandiacus"), Some(id));
        assert_eq!(snapshot.lookup("Nyctea scandiaca"), Some(id));
        assert_eq!(snapshot.lookup("Canis lupus"), None);
    }

    #[test]
    fn test_alias_never_shadows_canonical() {
        let owl = Uuid::new_v4();
        let bear = Uuid::new_v4();
        let mut snapshot = RegistrySnapshot::from_pairs([
            ("Nyctea scandiaca".to_string(), owl),
            ("Ursus maritimus".to_string(), bear),
        ]);
        snapshot.add_alias("Ursus maritimus", "Nyctea scandiaca");
        assert_eq!(snapshot.lookup("Ursus maritimus"), Some(bear));
    }

    #[test]
    fn test_alias_to_unknown_canonical_is_skipped() {
        let mut snapshot = RegistrySnapshot::default();
        snapshot.add_alias("Foo", "Bar");
        assert_eq!(snapshot.lookup("Foo"), None);
    }
}
