//! Shared plumbing for the Arctic Trade Tracker pipeline.
//!
//! Everything here is stage-agnostic: the error type, logging setup, the
//! retry policy used by all database-facing components, the stage outcome
//! taxonomy the orchestrator switches on, and the per-run report artifact.

pub mod error;
pub mod logging;
pub mod report;
pub mod retry;
pub mod stage;

pub use error::{AttError, Result};
pub use retry::RetryPolicy;
pub use stage::StageOutcome;
