//! `att validate` command implementation
//!
//! Runs the check battery over staging and writes the validation report.
//! The report lands at a stable path (`<report_dir>/validation_report.json`)
//! so the merge command can find the latest verdict.

use crate::error::{CliError, Result};
use att_common::report::RunReport;
use att_common::StageOutcome;
use att_store::validate::{ValidationGate, ValidationReport, ValidationStatus};
use att_store::DbConfig;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stable location of the most recent validation report.
pub fn report_path(report_dir: &Path) -> PathBuf {
    report_dir.join("validation_report.json")
}

pub async fn run(
    expected_count: Option<i64>,
    latency_threshold_ms: u64,
    report_dir: &Path,
) -> Result<()> {
    let outcome = execute(expected_count, latency_threshold_ms, report_dir).await?;
    if let StageOutcome::Failed { reason } = outcome {
        return Err(CliError::GateFailed(reason));
    }
    Ok(())
}

pub async fn execute(
    expected_count: Option<i64>,
    latency_threshold_ms: u64,
    report_dir: &Path,
) -> Result<StageOutcome> {
    let config = DbConfig::from_env()?;
    let pool = config.connect().await?;

    let gate = ValidationGate::new(pool)
        .with_latency_threshold(Duration::from_millis(latency_threshold_ms));
    let report = gate.run(expected_count).await?;

    // Written pass or fail; this file is the gate's verdict.
    report.save(&report_path(report_dir))?;
    print_report(&report);

    let outcome = match report.status {
        ValidationStatus::Passed => StageOutcome::Succeeded,
        ValidationStatus::PassedWithWarnings => StageOutcome::with_warnings(
            report
                .checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| format!("{}: {}", c.check_name, c.details))
                .collect(),
        ),
        ValidationStatus::Failed => {
            let reasons: Vec<String> = report
                .checks
                .iter()
                .filter(|c| !c.passed && c.severity == att_store::validate::Severity::Critical)
                .map(|c| format!("{}: {}", c.check_name, c.details))
                .collect();
            StageOutcome::failed(reasons.join("; "))
        }
    };

    RunReport::new("validate", false, outcome.clone())
        .with_details(&report)?
        .save(report_dir)?;

    Ok(outcome)
}

fn print_report(report: &ValidationReport) {
    println!();
    println!("{}", "Validation Report:".cyan().bold());
    println!("  Staging rows:   {}", report.staging_count);
    println!("  Unique species: {}", report.summary.unique_species);
    if let (Some(min), Some(max)) = (report.summary.min_year, report.summary.max_year) {
        println!("  Year range:     {}-{}", min, max);
    }
    for (appendix, count) in &report.summary.appendix_counts {
        println!("  Appendix {:<4} {}", format!("{}:", appendix), count);
    }
    for check in &report.checks {
        let marker = if check.passed {
            "PASS".green()
        } else {
            match check.severity {
                att_store::validate::Severity::Warning => "WARN".yellow(),
                att_store::validate::Severity::Critical => "FAIL".red(),
            }
        };
        println!("  [{}] {:<20} {}", marker, check.check_name, check.details);
        for sample in &check.offending_samples {
            println!("         sample: {}", sample);
        }
    }
    let status = match report.status {
        ValidationStatus::Passed => "PASSED".green().bold(),
        ValidationStatus::PassedWithWarnings => "PASSED WITH WARNINGS".yellow().bold(),
        ValidationStatus::Failed => "FAILED".red().bold(),
    };
    println!("  Verdict: {}", status);
}
