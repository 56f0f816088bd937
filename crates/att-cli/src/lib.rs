//! Arctic Trade Tracker CLI
//!
//! One subcommand per pipeline stage, plus `run` which chains them with
//! gate enforcement:
//!
//! - **extract**: scan trade exports for registry species (`att extract`)
//! - **normalize**: build per-species dictionary-encoded archives
//!   (`att normalize`)
//! - **load**: clear-then-load staging from archives (`att load`)
//! - **validate**: run the check battery over staging (`att validate`)
//! - **backup**: snapshot production with a verified manifest (`att backup`)
//! - **merge**: deduplicated merge of staging into production (`att merge`)
//! - **restore**: roll production back to a snapshot (`att restore`)
//! - **run**: the whole pipeline in order (`att run`)

pub mod commands;
pub mod error;

pub use error::{CliError, Result};

use att_store::merge::MergeStrategy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Arctic Trade Tracker - CITES trade reconciliation pipeline
#[derive(Parser, Debug)]
#[command(name = "att")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory for run reports
    #[arg(long, env = "ATT_REPORT_DIR", default_value = "reports", global = true)]
    pub report_dir: PathBuf,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract registry-species rows from trade export files
    Extract {
        /// Directory containing trade_db_*.csv export files
        source_dir: PathBuf,

        /// Species registry list CSV
        #[arg(short, long, default_value = "data/species.csv")]
        species_file: PathBuf,

        /// Synonym override JSON file
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Directory for per-file artifacts and the combined dataset
        #[arg(short, long, default_value = "work/extracted")]
        output_dir: PathBuf,

        /// Rows per streaming chunk
        #[arg(long, default_value_t = 50_000)]
        chunk_size: usize,

        /// Concurrent file workers
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },

    /// Build per-species normalized archives from the combined dataset
    Normalize {
        /// Directory holding the combined dataset (extract output)
        #[arg(short, long, default_value = "work/extracted")]
        input_dir: PathBuf,

        /// Directory for species archives
        #[arg(short, long, default_value = "work/archives")]
        output_dir: PathBuf,

        /// Species registry list CSV
        #[arg(short, long, default_value = "data/species.csv")]
        species_file: PathBuf,

        /// Synonym override JSON file
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Skip species that already have an archive
        #[arg(long)]
        incremental: bool,
    },

    /// Load species archives into the staging table
    Load {
        /// Directory holding species archives
        #[arg(short, long, default_value = "work/archives")]
        archive_dir: PathBuf,

        /// Synonym override JSON file
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Rows per insert batch
        #[arg(long, default_value_t = 5_000)]
        batch_size: usize,

        /// Import-batch tag stamped on every loaded row
        #[arg(long, default_value = "cites_trade_db")]
        data_source: String,

        /// Resolve and count without touching the database
        #[arg(long)]
        dry_run: bool,

        /// Skip this many already-loaded records (resume after a failure)
        #[arg(long, default_value_t = 0)]
        resume_from: u64,
    },

    /// Run the validation battery over staging
    Validate {
        /// Expected staging row count (from the load report)
        #[arg(long)]
        expected_count: Option<i64>,

        /// Query latency warning threshold in milliseconds
        #[arg(long, default_value_t = 2_000)]
        latency_threshold_ms: u64,
    },

    /// Snapshot the production table
    Backup {
        /// Directory for snapshot and manifest files
        #[arg(short, long, default_value = "backups")]
        output_dir: PathBuf,
    },

    /// Merge staging into production, skipping duplicates
    Merge {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Rows per insert batch
        #[arg(long, default_value_t = 5_000)]
        batch_size: usize,

        /// Deduplication strategy
        #[arg(long, value_enum, default_value_t = StrategyArg::AntiJoin)]
        strategy: StrategyArg,

        /// Merge even without a passing validation report
        #[arg(long)]
        force: bool,
    },

    /// Restore production from a backup snapshot
    Restore {
        /// Manifest file written by `att backup`
        #[arg(short, long)]
        manifest: PathBuf,

        /// Verify the snapshot and report without touching production
        #[arg(long)]
        dry_run: bool,

        /// Confirm replacing the production table
        #[arg(long)]
        yes: bool,
    },

    /// Run the full pipeline: extract, normalize, load, validate, merge
    Run {
        /// Directory containing trade_db_*.csv export files
        source_dir: PathBuf,

        /// Species registry list CSV
        #[arg(short, long, default_value = "data/species.csv")]
        species_file: PathBuf,

        /// Synonym override JSON file
        #[arg(long)]
        overrides: Option<PathBuf>,

        /// Working directory for artifacts, archives, and backups
        #[arg(short, long, default_value = "work")]
        work_dir: PathBuf,

        /// Snapshot production before merging
        #[arg(long)]
        backup: bool,

        /// Stop before any database write
        #[arg(long)]
        dry_run: bool,
    },
}

/// Merge strategy flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// In-memory anti-join against production keys
    AntiJoin,
    /// INSERT .. ON CONFLICT DO NOTHING fallback
    OnConflict,
}

impl std::fmt::Display for StrategyArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyArg::AntiJoin => write!(f, "anti-join"),
            StrategyArg::OnConflict => write!(f, "on-conflict"),
        }
    }
}

impl From<StrategyArg> for MergeStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::AntiJoin => MergeStrategy::AntiJoin,
            StrategyArg::OnConflict => MergeStrategy::ConstraintFallback,
        }
    }
}
