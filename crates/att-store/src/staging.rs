//! Staging loader
//!
//! Clear-then-load: the staging table holds exactly one dataset at a time,
//! so every load starts by emptying it (the production table is never
//! touched here). Records are resolved against the registry snapshot first;
//! records whose taxon the registry does not know are counted and excluded,
//! never loaded with a null species id.
//!
//! Inserts go in batches. A failed batch is retried at half size so one bad
//! row cannot sink thousands of good ones; rows that still fail are counted
//! and reported. `resume_from` skips already-loaded records after an
//! interrupted run.

use crate::config::STAGING_TABLE;
use crate::error::Result;
use crate::registry::RegistrySnapshot;
use att_common::RetryPolicy;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

/// A denormalized trade record as handed over by the extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRecord {
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
}

/// An incoming record with its registry id attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub species_id: Uuid,
    pub record: IncomingRecord,
}

/// Resolve records against the registry snapshot. Pure; the unresolved
/// count feeds the load report and the stage outcome.
pub fn resolve_records(
    records: Vec<IncomingRecord>,
    snapshot: &RegistrySnapshot,
) -> (Vec<ResolvedRecord>, u64) {
    let mut resolved = Vec::with_capacity(records.len());
    let mut unresolved = 0u64;
    for record in records {
        match snapshot.lookup(&record.taxon) {
            Some(species_id) => resolved.push(ResolvedRecord { species_id, record }),
            None => unresolved += 1,
        }
    }
    (resolved, unresolved)
}

/// Outcome of a staging load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub total_records: u64,
    pub resolved: u64,
    pub unresolved: u64,
    pub skipped_resume: u64,
    pub loaded: u64,
    pub failed_rows: u64,
    pub failed_batches: u64,
    pub dry_run: bool,
}

impl LoadReport {
    /// Share of incoming records that resolved to a registry id.
    pub fn mapping_rate(&self) -> f64 {
        if self.total_records == 0 {
            return 100.0;
        }
        (self.resolved as f64 / self.total_records as f64) * 100.0
    }

    /// Share of attempted rows that actually landed.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.loaded + self.failed_rows;
        if attempted == 0 {
            return 100.0;
        }
        (self.loaded as f64 / attempted as f64) * 100.0
    }

    /// Offset to pass as `resume_from` when re-running after a failure.
    pub fn resume_offset(&self) -> u64 {
        self.skipped_resume + self.loaded
    }
}

pub struct StagingLoader {
    pool: PgPool,
    batch_size: usize,
    dry_run: bool,
    data_source: String,
    retry: RetryPolicy,
}

impl StagingLoader {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: 5_000,
            dry_run: false,
            data_source: "cites_trade_db".to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Tag every row of this load with an import-batch label.
    pub fn with_data_source(mut self, data_source: impl Into<String>) -> Self {
        self.data_source = data_source.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Empty the staging table. Production is never cleared here.
    pub async fn clear_staging(&self) -> Result<u64> {
        let query = format!("DELETE FROM {}", STAGING_TABLE);
        let result = sqlx::query(&query).execute(&self.pool).await?;
        info!(cleared = result.rows_affected(), "Cleared staging table");
        Ok(result.rows_affected())
    }

    pub async fn staging_count(&self) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", STAGING_TABLE);
        let (count,): (i64,) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Load records into staging. `resume_from` skips that many resolved
    /// records from the front; pass 0 for a fresh load (which clears the
    /// table first).
    pub async fn load(
        &self,
        records: Vec<IncomingRecord>,
        snapshot: &RegistrySnapshot,
        resume_from: u64,
    ) -> Result<LoadReport> {
        let total_records = records.len() as u64;
        let (resolved, unresolved) = resolve_records(records, snapshot);

        let mut report = LoadReport {
            total_records,
            resolved: resolved.len() as u64,
            unresolved,
            skipped_resume: resume_from.min(resolved.len() as u64),
            loaded: 0,
            failed_rows: 0,
            failed_batches: 0,
            dry_run: self.dry_run,
        };

        if unresolved > 0 {
            warn!(
                unresolved,
                mapping_rate = format!("{:.1}%", report.mapping_rate()),
                "Some records did not resolve to a registry species"
            );
        }

        if self.dry_run {
            info!(
                would_load = report.resolved - report.skipped_resume,
                "Dry run: staging untouched"
            );
            return Ok(report);
        }

        if resume_from == 0 {
            self.clear_staging().await?;
        } else {
            info!(resume_from, "Resuming interrupted load");
        }

        let pending = &resolved[report.skipped_resume as usize..];
        for batch in pending.chunks(self.batch_size) {
            match self.insert_with_retry(batch).await {
                Ok(()) => report.loaded += batch.len() as u64,
                Err(_) => {
                    // Halve and retry each side once; a bad row only costs
                    // its own half.
                    report.failed_batches += 1;
                    let mid = batch.len() / 2;
                    for half in [&batch[..mid], &batch[mid..]] {
                        if half.is_empty() {
                            continue;
                        }
                        match self.insert_with_retry(half).await {
                            Ok(()) => report.loaded += half.len() as u64,
                            Err(e) => {
                                report.failed_rows += half.len() as u64;
                                warn!(
                                    rows = half.len(),
                                    error = %e,
                                    "Batch half failed after retries; rows skipped"
                                );
                            },
                        }
                    }
                },
            }
        }

        info!(
            loaded = report.loaded,
            failed_rows = report.failed_rows,
            success_rate = format!("{:.1}%", report.success_rate()),
            "Staging load complete"
        );
        Ok(report)
    }

    async fn insert_with_retry(&self, batch: &[ResolvedRecord]) -> Result<()> {
        self.retry
            .run("staging batch insert", || async {
                self.insert_batch(batch).await
            })
            .await
    }

    async fn insert_batch(&self, batch: &[ResolvedRecord]) -> Result<()> {
        let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} (species_id, taxon, year, appendix, term, unit, importer, \
             exporter, origin, purpose, source, reporter_type, quantity, data_source) ",
            STAGING_TABLE
        ));
        builder.push_values(batch, |mut row, r| {
            row.push_bind(r.species_id)
                .push_bind(&r.record.taxon)
                .push_bind(r.record.year)
                .push_bind(&r.record.appendix)
                .push_bind(&r.record.term)
                .push_bind(&r.record.unit)
                .push_bind(&r.record.importer)
                .push_bind(&r.record.exporter)
                .push_bind(&r.record.origin)
                .push_bind(&r.record.purpose)
                .push_bind(&r.record.source)
                .push_bind(&r.record.reporter_type)
                .push_bind(r.record.quantity)
                .push_bind(&self.data_source);
        });
        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}
