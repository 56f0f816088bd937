//! Postgres-backed staging loader tests
//!
//! Requires Docker; run with `cargo test -p att-store -- --ignored`.

mod common;

use att_store::staging::{IncomingRecord, StagingLoader};
use att_store::RegistrySnapshot;
use common::TestPostgres;

const TAXON: &str = "Nyctea scandiaca";

fn record(year: i32) -> IncomingRecord {
    IncomingRecord {
        taxon: TAXON.to_string(),
        year: Some(year),
        appendix: "II".to_string(),
        term: "live".to_string(),
        unit: String::new(),
        importer: "NO".to_string(),
        exporter: "GL".to_string(),
        origin: String::new(),
        purpose: "Z".to_string(),
        source: "W".to_string(),
        reporter_type: "E".to_string(),
        quantity: Some(1.0),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_dry_run_leaves_staging_untouched() {
    let pg = TestPostgres::start().await.expect("container start");
    let owl = pg.seed_species(TAXON).await.expect("seed species");
    let snapshot = RegistrySnapshot::from_pairs([(TAXON.to_string(), owl)]);

    let loader = StagingLoader::new(pg.pool().clone());
    let wet = loader
        .load((2010..2013).map(record).collect(), &snapshot, 0)
        .await
        .expect("wet load");
    assert_eq!(wet.loaded, 3);
    assert_eq!(loader.staging_count().await.expect("count"), 3);

    // A dry run over a different dataset must neither clear nor insert.
    let dry_loader = StagingLoader::new(pg.pool().clone()).with_dry_run(true);
    let dry = dry_loader
        .load((1980..1990).map(record).collect(), &snapshot, 0)
        .await
        .expect("dry load");
    assert!(dry.dry_run);
    assert_eq!(dry.loaded, 0);
    assert_eq!(dry.resolved, 10);
    assert_eq!(loader.staging_count().await.expect("count"), 3);
}
