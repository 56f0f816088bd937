//! Database-facing half of the trade pipeline.
//!
//! Stages, in the order the orchestrator runs them:
//!
//! - **Staging load**: clear-then-load of denormalized records into the
//!   staging table, with species resolution against the registry snapshot,
//!   batch retry, and resume support.
//! - **Validation gate**: structural and domain checks over staging; its
//!   verdict decides whether the merge may run.
//! - **Backup**: full production snapshot plus manifest, verified before it
//!   counts.
//! - **Merge**: composite-natural-key deduplication of staging into
//!   production, idempotent by construction.
//!
//! Correctness-critical planning logic (key partitioning, record
//! resolution, domain checks) is kept in pure functions so it is testable
//! without a live database.

pub mod backup;
pub mod config;
pub mod error;
pub mod filter;
pub mod merge;
pub mod registry;
pub mod staging;
pub mod validate;

pub use config::DbConfig;
pub use error::{Result, StoreError};
pub use registry::RegistrySnapshot;
