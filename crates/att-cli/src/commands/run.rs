//! `att run` command implementation
//!
//! Chains the stages in order and enforces the gates between them: a
//! failed stage stops the pipeline, and the merge only runs on a passing
//! validation verdict taken after the load.

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::StageOutcome;
use att_store::merge::MergeStrategy;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct StageRecord {
    stage: String,
    outcome: StageOutcome,
}

#[derive(Serialize)]
struct PipelineSummary {
    dry_run: bool,
    stages: Vec<StageRecord>,
}

impl PipelineSummary {
    fn record(&mut self, stage: &str, outcome: &StageOutcome) {
        println!();
        println!("{} {} — {}", "stage".cyan().bold(), stage, outcome);
        self.stages.push(StageRecord {
            stage: stage.to_string(),
            outcome: outcome.clone(),
        });
    }

    fn finish(self, report_dir: &Path) -> Result<()> {
        let failed = self
            .stages
            .iter()
            .find(|s| !s.outcome.may_proceed())
            .map(|s| s.stage.clone());
        let outcome = match &failed {
            Some(stage) => StageOutcome::failed(format!("stopped at {}", stage)),
            None => {
                let warnings: Vec<String> = self
                    .stages
                    .iter()
                    .flat_map(|s| s.outcome.warnings().iter().cloned())
                    .collect();
                StageOutcome::with_warnings(warnings)
            }
        };

        let dry_run = self.dry_run;
        RunReport::new("run", dry_run, outcome.clone())
            .with_details(&self)?
            .save(report_dir)?;

        println!();
        match &outcome {
            StageOutcome::Failed { reason } => {
                println!("{} {}", "Pipeline failed:".red().bold(), reason);
                Err(CliError::Pipeline(reason.clone()))
            }
            other => {
                println!("{} {}", "Pipeline complete:".green().bold(), other);
                Ok(())
            }
        }
    }
}

pub async fn run(
    source_dir: &Path,
    species_file: &Path,
    overrides: Option<&Path>,
    work_dir: &Path,
    backup: bool,
    dry_run: bool,
    report_dir: &Path,
) -> Result<()> {
    let extracted_dir = work_dir.join("extracted");
    let archive_dir = work_dir.join("archives");
    let backup_dir = work_dir.join("backups");

    let mut summary = PipelineSummary {
        dry_run,
        stages: Vec::new(),
    };

    let outcome = super::extract::execute(
        source_dir,
        species_file,
        overrides,
        &extracted_dir,
        50_000,
        4,
        report_dir,
    )
    .await?;
    summary.record("extract", &outcome);
    if !outcome.may_proceed() {
        return summary.finish(report_dir);
    }

    let outcome = super::normalize::execute(
        &extracted_dir,
        &archive_dir,
        species_file,
        overrides,
        false,
        report_dir,
    )
    .await?;
    summary.record("normalize", &outcome);
    if !outcome.may_proceed() {
        return summary.finish(report_dir);
    }

    let (outcome, load_report) = super::load::execute(
        &archive_dir,
        overrides,
        5_000,
        "cites_trade_db",
        dry_run,
        0,
        report_dir,
    )
    .await?;
    summary.record("load", &outcome);
    if !outcome.may_proceed() {
        return summary.finish(report_dir);
    }

    if dry_run {
        println!();
        println!("{}", "Dry run: stopping before validation and merge".yellow());
        return summary.finish(report_dir);
    }

    let expected = load_report.loaded as i64;
    let outcome = super::validate::execute(Some(expected), 2_000, report_dir).await?;
    summary.record("validate", &outcome);
    if !outcome.may_proceed() {
        return summary.finish(report_dir);
    }

    // The merge never deletes anything, so a snapshot is opt-in here; it
    // is mandatory only before destructive full reloads.
    if backup {
        let outcome = super::backup::execute(&backup_dir, report_dir).await?;
        summary.record("backup", &outcome);
        if !outcome.may_proceed() {
            return summary.finish(report_dir);
        }
    }

    let outcome = super::merge::execute(
        false,
        5_000,
        MergeStrategy::AntiJoin,
        false,
        report_dir,
    )
    .await?;
    summary.record("merge", &outcome);

    summary.finish(report_dir)
}
