//! Merge and deduplication
//!
//! Moves staging rows into production exactly once, keyed by the composite
//! natural key (species, year, appendix, taxon, importer, exporter, term,
//! purpose, source). Text fields are stored as `''` when unreported, so the
//! key never needs null semantics; the nullable year is coalesced to 0 in
//! the key.
//!
//! Primary strategy: fetch the production keys for the species present in
//! staging, partition staging in memory, insert only the absent rows.
//! Fallback strategy: insert everything with `ON CONFLICT DO NOTHING` and
//! count duplicates from the affected-row delta. Both are idempotent: a
//! re-run inserts nothing.

use crate::config::{STAGING_TABLE, TRADE_TABLE};
use crate::error::{Result, StoreError};
use crate::filter::TradeFilter;
use att_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

const PAGE_SIZE: i64 = 10_000;

/// The composite natural key identifying one trade event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub species_id: Uuid,
    /// Coalesced: `None` year participates as 0.
    pub year: i32,
    pub appendix: String,
    pub taxon: String,
    pub importer: String,
    pub exporter: String,
    pub term: String,
    pub purpose: String,
    pub source: String,
}

/// One staged row, as fetched for merging.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StagingRow {
    pub species_id: Uuid,
    pub taxon: String,
    pub year: Option<i32>,
    pub appendix: String,
    pub term: String,
    pub unit: String,
    pub importer: String,
    pub exporter: String,
    pub origin: String,
    pub purpose: String,
    pub source: String,
    pub reporter_type: String,
    pub quantity: Option<f64>,
    pub data_source: String,
}

impl StagingRow {
    pub fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            species_id: self.species_id,
            year: self.year.unwrap_or(0),
            appendix: self.appendix.clone(),
            taxon: self.taxon.clone(),
            importer: self.importer.clone(),
            exporter: self.exporter.clone(),
            term: self.term.clone(),
            purpose: self.purpose.clone(),
            source: self.source.clone(),
        }
    }
}

/// Split staging rows into (new, duplicate-count) against a set of
/// production keys. Pure; this is the heart of the anti-join strategy.
pub fn partition_new_records<'a>(
    staging: &'a [StagingRow],
    production_keys: &HashSet<NaturalKey>,
) -> (Vec<&'a StagingRow>, u64) {
    let mut new_rows = Vec::new();
    let mut duplicates = 0u64;
    for row in staging {
        if production_keys.contains(&row.natural_key()) {
            duplicates += 1;
        } else {
            new_rows.push(row);
        }
    }
    (new_rows, duplicates)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// In-memory anti-join against production keys.
    AntiJoin,
    /// `INSERT ... ON CONFLICT DO NOTHING` against the natural-key index.
    ConstraintFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub strategy: MergeStrategy,
    pub staging_count: u64,
    pub production_before: u64,
    pub inserted: u64,
    pub expected_duplicates: u64,
    pub production_after: u64,
    pub dry_run: bool,
}

pub struct MergeEngine {
    pool: PgPool,
    batch_size: usize,
    dry_run: bool,
    strategy: MergeStrategy,
    retry: RetryPolicy,
}

impl MergeEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: 5_000,
            dry_run: false,
            strategy: MergeStrategy::AntiJoin,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Run the merge. Conservation invariant: every staging row either
    /// lands in production or is accounted for as a duplicate; a shortfall
    /// is an error, never silent.
    pub async fn merge(&self) -> Result<MergeReport> {
        let staging = self.fetch_staging().await?;
        let staging_count = staging.len() as u64;
        let production_before = self.production_count().await?;

        if staging.is_empty() {
            info!("Staging is empty; nothing to merge");
            return Ok(MergeReport {
                strategy: self.strategy,
                staging_count: 0,
                production_before,
                inserted: 0,
                expected_duplicates: 0,
                production_after: production_before,
                dry_run: self.dry_run,
            });
        }

        let (inserted, expected_duplicates) = match self.strategy {
            MergeStrategy::AntiJoin => self.merge_anti_join(&staging).await?,
            MergeStrategy::ConstraintFallback => self.merge_on_conflict(&staging).await?,
        };

        let production_after = if self.dry_run {
            production_before
        } else {
            self.production_count().await?
        };

        let report = MergeReport {
            strategy: self.strategy,
            staging_count,
            production_before,
            inserted,
            expected_duplicates,
            production_after,
            dry_run: self.dry_run,
        };

        if inserted + expected_duplicates != staging_count {
            return Err(StoreError::Merge(format!(
                "conservation violated: {} staged, {} inserted + {} duplicates",
                staging_count, inserted, expected_duplicates
            )));
        }
        if !self.dry_run && production_after != production_before + inserted {
            return Err(StoreError::Merge(format!(
                "production count drifted: {} before + {} inserted != {} after",
                production_before, inserted, production_after
            )));
        }

        info!(
            inserted,
            duplicates = expected_duplicates,
            production_after,
            "Merge complete"
        );
        Ok(report)
    }

    async fn merge_anti_join(&self, staging: &[StagingRow]) -> Result<(u64, u64)> {
        // Narrow the production scan to the species actually being merged.
        let species_ids: HashSet<Uuid> = staging.iter().map(|r| r.species_id).collect();
        let keys = self
            .fetch_production_keys(species_ids.into_iter().collect())
            .await?;
        let (new_rows, duplicates) = partition_new_records(staging, &keys);

        if self.dry_run {
            info!(
                would_insert = new_rows.len(),
                duplicates, "Dry run: production untouched"
            );
            return Ok((new_rows.len() as u64, duplicates));
        }

        let mut inserted = 0u64;
        for batch in new_rows.chunks(self.batch_size) {
            self.retry
                .run("merge batch insert", || async {
                    self.insert_batch(batch, false).await.map(|_| ())
                })
                .await?;
            inserted += batch.len() as u64;
        }
        Ok((inserted, duplicates))
    }

    async fn merge_on_conflict(&self, staging: &[StagingRow]) -> Result<(u64, u64)> {
        if self.dry_run {
            // Without touching production the fallback cannot split new
            // from duplicate; report everything as potential inserts.
            warn!("Dry run with constraint fallback cannot predict duplicates");
            return Ok((staging.len() as u64, 0));
        }

        let mut inserted = 0u64;
        let mut duplicates = 0u64;
        let refs: Vec<&StagingRow> = staging.iter().collect();
        for batch in refs.chunks(self.batch_size) {
            let affected = self
                .retry
                .run("merge on-conflict insert", || async {
                    self.insert_batch(batch, true).await
                })
                .await?;
            inserted += affected;
            duplicates += batch.len() as u64 - affected;
        }
        Ok((inserted, duplicates))
    }

    async fn insert_batch(&self, batch: &[&StagingRow], on_conflict: bool) -> Result<u64> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (species_id, taxon, year, appendix, term, unit, importer, \
             exporter, origin, purpose, source, reporter_type, quantity, data_source) ",
            TRADE_TABLE
        ));
        builder.push_values(batch, |mut row, r| {
            row.push_bind(r.species_id)
                .push_bind(&r.taxon)
                .push_bind(r.year)
                .push_bind(&r.appendix)
                .push_bind(&r.term)
                .push_bind(&r.unit)
                .push_bind(&r.importer)
                .push_bind(&r.exporter)
                .push_bind(&r.origin)
                .push_bind(&r.purpose)
                .push_bind(&r.source)
                .push_bind(&r.reporter_type)
                .push_bind(r.quantity)
                .push_bind(&r.data_source);
        });
        if on_conflict {
            builder.push(
                " ON CONFLICT (species_id, COALESCE(year, 0), appendix, taxon, importer, \
                 exporter, term, purpose, source) DO NOTHING",
            );
        }
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_staging(&self) -> Result<Vec<StagingRow>> {
        let mut rows = Vec::new();
        let mut offset: i64 = 0;
        loop {
            let query = format!(
                "SELECT species_id, taxon, year, appendix, term, unit, importer, exporter, \
                 origin, purpose, source, reporter_type, quantity, data_source FROM {} \
                 ORDER BY id LIMIT $1 OFFSET $2",
                STAGING_TABLE
            );
            let page = sqlx::query_as::<_, StagingRow>(&query)
                .bind(PAGE_SIZE)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
            let page_len = page.len();
            rows.extend(page);
            if (page_len as i64) < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        Ok(rows)
    }

    async fn fetch_production_keys(&self, species_ids: Vec<Uuid>) -> Result<HashSet<NaturalKey>> {
        let filter = TradeFilter::for_species(species_ids);
        let mut keys = HashSet::new();
        let mut offset: i64 = 0;
        loop {
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "SELECT species_id, year, appendix, taxon, importer, exporter, term, \
                 purpose, source FROM {}",
                TRADE_TABLE
            ));
            filter.push_where(&mut builder);
            builder.push(" ORDER BY id LIMIT ");
            builder.push_bind(PAGE_SIZE);
            builder.push(" OFFSET ");
            builder.push_bind(offset);

            let page = builder.build().fetch_all(&self.pool).await?;
            let page_len = page.len();
            for row in page {
                let year: Option<i32> = row.try_get("year")?;
                keys.insert(NaturalKey {
                    species_id: row.try_get("species_id")?,
                    year: year.unwrap_or(0),
                    appendix: row.try_get("appendix")?,
                    taxon: row.try_get("taxon")?,
                    importer: row.try_get("importer")?,
                    exporter: row.try_get("exporter")?,
                    term: row.try_get("term")?,
                    purpose: row.try_get("purpose")?,
                    source: row.try_get("source")?,
                });
            }
            if (page_len as i64) < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        Ok(keys)
    }

    async fn production_count(&self) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", TRADE_TABLE);
        let (count,): (i64,) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}
