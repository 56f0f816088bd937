//! Extraction and normalization for CITES-style trade data
//!
//! This crate covers the file-facing half of the pipeline:
//!
//! - **Species matching**: O(1) lookup over canonical names, aliases, and a
//!   hand-maintained synonym override list.
//! - **Streaming extraction**: bounded-memory chunked scans over a directory
//!   of delimited trade files, one intermediate artifact per source file.
//! - **Consolidation**: deterministic (year, taxon) ordering plus per-species
//!   coverage summaries.
//! - **Normalization**: dictionary encoding into lookup tables with an exact
//!   round-trip guarantee, serialized as both plain and gzipped JSON.

pub mod archive;
pub mod consolidate;
pub mod extract;
pub mod normalize;
pub mod record;
pub mod species;

pub use record::TradeRecord;
pub use species::SpeciesIndex;
