//! Postgres-backed merge tests
//!
//! Exercise the merge against a real natural-key index: the on-conflict
//! fallback's duplicate counting and the re-run behavior of both
//! strategies. Requires Docker; run with
//! `cargo test -p att-store -- --ignored`.

mod common;

use att_store::merge::{MergeEngine, MergeStrategy};
use att_store::staging::{IncomingRecord, StagingLoader};
use att_store::RegistrySnapshot;
use common::TestPostgres;

const TAXON: &str = "Ursus maritimus";

fn record(year: Option<i32>, term: &str) -> IncomingRecord {
    IncomingRecord {
        taxon: TAXON.to_string(),
        year,
        appendix: "II".to_string(),
        term: term.to_string(),
        unit: String::new(),
        importer: "US".to_string(),
        exporter: "CA".to_string(),
        origin: String::new(),
        purpose: "T".to_string(),
        source: "W".to_string(),
        reporter_type: "I".to_string(),
        quantity: Some(2.0),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_on_conflict_merge_counts_duplicates() {
    let pg = TestPostgres::start().await.expect("container start");
    let bear = pg.seed_species(TAXON).await.expect("seed species");
    let snapshot = RegistrySnapshot::from_pairs([(TAXON.to_string(), bear)]);

    // Includes a null-year record: the index coalesces it to 0, so it must
    // deduplicate like any other row.
    let mut records: Vec<IncomingRecord> =
        (2000..2005).map(|y| record(Some(y), "skins")).collect();
    records.push(record(None, "skins"));

    let loader = StagingLoader::new(pg.pool().clone());
    let report = loader
        .load(records.clone(), &snapshot, 0)
        .await
        .expect("first load");
    assert_eq!(report.loaded, 6);

    let engine = MergeEngine::new(pg.pool().clone())
        .with_strategy(MergeStrategy::ConstraintFallback);
    let first = engine.merge().await.expect("first merge");
    assert_eq!(first.inserted, 6);
    assert_eq!(first.expected_duplicates, 0);
    assert_eq!(first.production_after, 6);

    // Reload the same dataset plus one genuinely new record. rows_affected
    // must separate the duplicate rejections from the single insert.
    records.push(record(Some(2005), "live"));
    loader
        .load(records, &snapshot, 0)
        .await
        .expect("second load");
    let second = engine.merge().await.expect("second merge");
    assert_eq!(second.inserted, 1);
    assert_eq!(second.expected_duplicates, 6);
    assert_eq!(second.production_after, 7);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_anti_join_merge_rerun_inserts_nothing() {
    let pg = TestPostgres::start().await.expect("container start");
    let bear = pg.seed_species(TAXON).await.expect("seed species");
    let snapshot = RegistrySnapshot::from_pairs([(TAXON.to_string(), bear)]);

    let records: Vec<IncomingRecord> =
        (1990..1994).map(|y| record(Some(y), "skins")).collect();
    let loader = StagingLoader::new(pg.pool().clone());
    loader.load(records, &snapshot, 0).await.expect("load");

    let engine = MergeEngine::new(pg.pool().clone());
    let first = engine.merge().await.expect("first merge");
    assert_eq!(first.strategy, MergeStrategy::AntiJoin);
    assert_eq!(first.inserted, 4);

    // Staging is untouched by the merge; running again must be a no-op.
    let second = engine.merge().await.expect("second merge");
    assert_eq!(second.inserted, 0);
    assert_eq!(second.expected_duplicates, 4);
    assert_eq!(second.production_after, first.production_after);
}
