//! Backup and rollback
//!
//! Before any merge touches production, the whole trade table is snapshot
//! to newline-delimited JSON next to a manifest describing it (row count,
//! species count, SHA-256 checksum). A snapshot only counts as valid once
//! it has been re-read and checked against both the manifest and the live
//! table. Restore is the inverse and fail-closed: any mismatch aborts
//! before the table is touched.

use crate::config::TRADE_TABLE;
use crate::error::{Result, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

const PAGE_SIZE: i64 = 10_000;

/// One production row, as snapshot to disk.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BackupRow {
    pub id: i64,
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

/// Snapshot description, stored beside the data file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub snapshot_file: String,
    pub table: String,
    pub row_count: u64,
    pub species_count: u64,
    pub checksum_sha256: String,
    pub created_at: String,
    pub restore_hint: String,
}

impl BackupManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// SHA-256 of a file, hex encoded.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a snapshot file against its manifest: checksum first, then row
/// count and per-line parse. Any mismatch is an error.
pub fn verify_snapshot(manifest: &BackupManifest, snapshot_path: &Path) -> Result<u64> {
    let checksum = file_checksum(snapshot_path)?;
    if checksum != manifest.checksum_sha256 {
        return Err(StoreError::Backup(format!(
            "checksum mismatch for {}: manifest {}, file {}",
            snapshot_path.display(),
            manifest.checksum_sha256,
            checksum
        )));
    }

    let file = std::fs::File::open(snapshot_path)?;
    let mut rows = 0u64;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        serde_json::from_str::<BackupRow>(&line)
            .map_err(|e| StoreError::Backup(format!("corrupt snapshot line {}: {}", rows + 1, e)))?;
        rows += 1;
    }

    if rows != manifest.row_count {
        return Err(StoreError::Backup(format!(
            "row count mismatch: manifest says {}, snapshot holds {}",
            manifest.row_count, rows
        )));
    }
    Ok(rows)
}

pub struct BackupController {
    pool: PgPool,
    batch_size: usize,
}

impl BackupController {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: 5_000,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Snapshot production to `dir`. Returns the manifest path only after
    /// the written file has been verified against the live table.
    pub async fn snapshot(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let snapshot_name = format!("trade_backup_{}.ndjson", stamp);
        let snapshot_path = dir.join(&snapshot_name);

        let file = std::fs::File::create(&snapshot_path)?;
        let mut writer = BufWriter::new(file);
        let mut species: HashSet<Uuid> = HashSet::new();
        let mut rows = 0u64;
        let mut offset: i64 = 0;
        loop {
            let query = format!(
                "SELECT id, species_id, taxon, year, appendix, term, unit, importer, \
                 exporter, origin, purpose, source, reporter_type, quantity, data_source \
                 FROM {} ORDER BY id LIMIT $1 OFFSET $2",
                TRADE_TABLE
            );
            let page = sqlx::query_as::<_, BackupRow>(&query)
                .bind(PAGE_SIZE)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
            let page_len = page.len();
            for row in &page {
                species.insert(row.species_id);
                serde_json::to_writer(&mut writer, row)?;
                writer.write_all(b"\n")?;
                rows += 1;
            }
            if (page_len as i64) < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }
        writer.flush()?;
        drop(writer);

        // The snapshot only counts once it matches the live table.
        let live = self.production_count().await?;
        if rows != live {
            return Err(StoreError::Backup(format!(
                "table changed during snapshot: wrote {} rows, table has {}",
                rows, live
            )));
        }

        let manifest = BackupManifest {
            snapshot_file: snapshot_name,
            table: TRADE_TABLE.to_string(),
            row_count: rows,
            species_count: species.len() as u64,
            checksum_sha256: file_checksum(&snapshot_path)?,
            created_at: Utc::now().to_rfc3339(),
            restore_hint: "att restore --manifest <this file>".to_string(),
        };
        verify_snapshot(&manifest, &snapshot_path)?;

        let manifest_path = dir.join(format!("trade_backup_{}.manifest.json", stamp));
        manifest.save(&manifest_path)?;
        info!(
            rows,
            species = manifest.species_count,
            manifest = %manifest_path.display(),
            "Backup snapshot verified and saved"
        );
        Ok(manifest_path)
    }

    /// Restore production from a snapshot. Verifies the snapshot first and
    /// refuses to truncate anything when verification fails.
    pub async fn restore(&self, manifest_path: &Path) -> Result<u64> {
        let manifest = BackupManifest::load(manifest_path)?;
        let dir = manifest_path
            .parent()
            .ok_or_else(|| StoreError::Backup("manifest has no parent directory".to_string()))?;
        let snapshot_path = dir.join(&manifest.snapshot_file);

        verify_snapshot(&manifest, &snapshot_path)?;
        warn!(
            rows = manifest.row_count,
            "Restoring production from snapshot; current contents will be replaced"
        );

        let file = std::fs::File::open(&snapshot_path)?;
        let mut rows: Vec<BackupRow> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                rows.push(serde_json::from_str(&line)?);
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("TRUNCATE {}", TRADE_TABLE))
            .execute(&mut *tx)
            .await?;
        for batch in rows.chunks(self.batch_size) {
            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (id, species_id, taxon, year, appendix, term, unit, \
                 importer, exporter, origin, purpose, source, reporter_type, quantity, \
                 data_source) ",
                TRADE_TABLE
            ));
            builder.push_values(batch, |mut b, r| {
                b.push_bind(r.id)
                    .push_bind(r.species_id)
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
            builder.build().execute(&mut *tx).await?;
        }
        // Keep the id sequence ahead of the restored rows.
        sqlx::query(&format!(
            "SELECT setval(pg_get_serial_sequence('{}', 'id'), \
             COALESCE((SELECT MAX(id) FROM {}), 1))",
            TRADE_TABLE, TRADE_TABLE
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let restored = self.production_count().await?;
        if restored != manifest.row_count {
            return Err(StoreError::Backup(format!(
                "restore verification failed: {} restored, manifest says {}",
                restored, manifest.row_count
            )));
        }
        info!(restored, "Restore complete and verified");
        Ok(restored)
    }

    async fn production_count(&self) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", TRADE_TABLE);
        let (count,): (i64,) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample_row(id: i64) -> BackupRow {
        BackupRow {
            id,
            species_id: Uuid::new_v4(),
            taxon: "Ursus maritimus".to_string(),
            year: Some(2001),
            appendix: "II".to_string(),
            term: "skins".to_string(),
            unit: String::new(),
            importer: "US".to_string(),
            exporter: "CA".to_string(),
            origin: String::new(),
            purpose: "T".to_string(),
            source: "W".to_string(),
            reporter_type: "I".to_string(),
            quantity: Some(2.0),
            data_source: "cites_trade_db".to_string(),
        }
    }

    fn write_snapshot(dir: &Path, rows: &[BackupRow]) -> (PathBuf, BackupManifest) {
        let path = dir.join("trade_backup_test.ndjson");
        let mut file = std::fs::File::create(&path).unwrap();
        let mut species = HashSet::new();
        for row in rows {
            species.insert(row.species_id);
            writeln!(file, "{}", serde_json::to_string(row).unwrap()).unwrap();
        }
        let manifest = BackupManifest {
            snapshot_file: "trade_backup_test.ndjson".to_string(),
            table: TRADE_TABLE.to_string(),
            row_count: rows.len() as u64,
            species_count: species.len() as u64,
            checksum_sha256: file_checksum(&path).unwrap(),
            created_at: Utc::now().to_rfc3339(),
            restore_hint: String::new(),
        };
        (path, manifest)
    }

    #[test]
    fn test_verify_accepts_intact_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<BackupRow> = (1..=5).map(sample_row).collect();
        let (path, manifest) = write_snapshot(dir.path(), &rows);
        assert_eq!(verify_snapshot(&manifest, &path).unwrap(), 5);
    }

    #[test]
    fn test_verify_rejects_tampered_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<BackupRow> = (1..=3).map(sample_row).collect();
        let (path, manifest) = write_snapshot(dir.path(), &rows);

        // Flip a byte after the manifest was written.
        let mut text = std::fs::read_to_string(&path).unwrap();
        text = text.replace("skins", "skulls");
        std::fs::write(&path, text).unwrap();

        let err = verify_snapshot(&manifest, &path).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[test]
    fn test_verify_rejects_row_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<BackupRow> = (1..=3).map(sample_row).collect();
        let (path, mut manifest) = write_snapshot(dir.path(), &rows);
        manifest.row_count = 4;
        let err = verify_snapshot(&manifest, &path).unwrap_err();
        assert!(err.to_string().contains("row count mismatch"));
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<BackupRow> = (1..=2).map(sample_row).collect();
        let (_, manifest) = write_snapshot(dir.path(), &rows);

        let manifest_path = dir.path().join("manifest.json");
        manifest.save(&manifest_path).unwrap();
        let restored = BackupManifest::load(&manifest_path).unwrap();
        assert_eq!(restored.row_count, manifest.row_count);
        assert_eq!(restored.checksum_sha256, manifest.checksum_sha256);
    }

    #[test]
    fn test_checksum_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ndjson");
        std::fs::write(&path, "{\"a\":1}\n").unwrap();
        assert_eq!(file_checksum(&path).unwrap(), file_checksum(&path).unwrap());
    }
}
