//! Validation gate
//!
//! Runs a fixed battery of checks over the freshly loaded staging table and
//! produces a machine-readable verdict. The merge stage refuses to run
//! unless the verdict allows it. The report is written to disk whether the
//! gate passes or fails.
//!
//! Check battery:
//! 1. record count against the expected count from the load report
//! 2. species foreign-key integrity (null or unknown ids are fatal)
//! 3. categorical domains (appendix, purpose code, source code)
//! 4. year plausibility
//! 5. duplicate natural keys within staging (fatal: the merge would
//!    multiply them)
//! 6. query latency smoke test (never blocks a merge on its own)
//!
//! Domain checks run over fetched rows in pure functions, so corrupt-data
//! scenarios are testable without a database.

use crate::config::{SPECIES_TABLE, STAGING_TABLE};
use crate::error::Result;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Appendix values as they appear in source exports. `N` marks a
/// not-listed population in a split listing and is preserved verbatim.
pub const APPENDIX_VALUES: &[&str] = &["I", "II", "III", "N"];

/// CITES purpose-of-transaction codes.
pub const PURPOSE_CODES: &[&str] =
    &["B", "E", "G", "H", "L", "M", "N", "P", "Q", "S", "T", "Z"];

/// CITES source-of-specimen codes.
pub const SOURCE_CODES: &[&str] =
    &["A", "C", "D", "F", "I", "O", "R", "U", "W", "X", "Y"];

/// Treaty entry into force; no trade record can predate it.
pub const MIN_YEAR: i32 = 1975;

/// Count shortfall below this fraction is a warning, not a failure.
const COUNT_TOLERANCE: f64 = 0.10;

const SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// One check's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_name: String,
    pub passed: bool,
    pub severity: Severity,
    pub details: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offending_samples: Vec<String>,
}

impl CheckResult {
    fn pass(name: &str, details: impl Into<String>) -> Self {
        Self {
            check_name: name.to_string(),
            passed: true,
            severity: Severity::Warning,
            details: details.into(),
            offending_samples: Vec::new(),
        }
    }

    fn fail(
        name: &str,
        severity: Severity,
        details: impl Into<String>,
        samples: Vec<String>,
    ) -> Self {
        Self {
            check_name: name.to_string(),
            passed: false,
            severity,
            details: details.into(),
            offending_samples: samples,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    PassedWithWarnings,
    Failed,
}

impl ValidationStatus {
    /// Whether the merge stage may run on this verdict.
    pub fn may_proceed(&self) -> bool {
        !matches!(self, ValidationStatus::Failed)
    }
}

/// Shape of the staged dataset, reported alongside the verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingSummary {
    pub unique_species: u64,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub appendix_counts: BTreeMap<String, u64>,
}

/// Summarize fetched staging rows. Pure.
pub fn summarize_staging(rows: &[DomainRow]) -> StagingSummary {
    let mut summary = StagingSummary::default();
    let mut species: HashSet<Uuid> = HashSet::new();
    for row in rows {
        species.insert(row.species_id);
        if let Some(year) = row.year {
            summary.min_year = Some(summary.min_year.map_or(year, |m| m.min(year)));
            summary.max_year = Some(summary.max_year.map_or(year, |m| m.max(year)));
        }
        *summary
            .appendix_counts
            .entry(row.appendix.clone())
            .or_insert(0) += 1;
    }
    summary.unique_species = species.len() as u64;
    summary
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub staging_count: i64,
    pub expected_count: Option<i64>,

    #[serde(default)]
    pub summary: StagingSummary,
    pub checks: Vec<CheckResult>,
    pub created_at: String,
}

impl ValidationReport {
    /// Derive the verdict from individual check results.
    pub fn from_checks(staging_count: i64, expected_count: Option<i64>, checks: Vec<CheckResult>) -> Self {
        let any_critical = checks
            .iter()
            .any(|c| !c.passed && c.severity == Severity::Critical);
        let any_warning = checks.iter().any(|c| !c.passed);
        let status = if any_critical {
            ValidationStatus::Failed
        } else if any_warning {
            ValidationStatus::PassedWithWarnings
        } else {
            ValidationStatus::Passed
        };
        Self {
            status,
            staging_count,
            expected_count,
            summary: StagingSummary::default(),
            checks,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_summary(mut self, summary: StagingSummary) -> Self {
        self.summary = summary;
        self
    }

    /// Persist as JSON. Written on every run, pass or fail.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), status = ?self.status, "Saved validation report");
        Ok(())
    }
}

/// One staging row's domain-checked fields.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DomainRow {
    pub species_id: Uuid,
    pub appendix: String,
    pub purpose: String,
    pub source: String,
    pub year: Option<i32>,
}

/// Check the staging count against the expected count from the load.
pub fn check_count(actual: i64, expected: Option<i64>) -> CheckResult {
    const NAME: &str = "record_count";
    let Some(expected) = expected else {
        return CheckResult::pass(NAME, format!("{} rows staged (no expected count)", actual));
    };
    if actual == expected {
        return CheckResult::pass(NAME, format!("{} rows staged, as expected", actual));
    }
    if actual > expected {
        return CheckResult::fail(
            NAME,
            Severity::Warning,
            format!("{} rows staged, {} expected (excess)", actual, expected),
            vec![],
        );
    }
    let shortfall = (expected - actual) as f64 / expected as f64;
    let severity = if shortfall < COUNT_TOLERANCE {
        Severity::Warning
    } else {
        Severity::Critical
    };
    CheckResult::fail(
        NAME,
        severity,
        format!(
            "{} rows staged, {} expected ({:.1}% shortfall)",
            actual,
            expected,
            shortfall * 100.0
        ),
        vec![],
    )
}

/// Domain checks over fetched rows. Pure.
pub fn check_domains(rows: &[DomainRow], current_year: i32) -> Vec<CheckResult> {
    let mut bad_appendix = Vec::new();
    let mut bad_purpose = Vec::new();
    let mut bad_source = Vec::new();
    let mut bad_year = Vec::new();

    for row in rows {
        if !row.appendix.is_empty() && !APPENDIX_VALUES.contains(&row.appendix.as_str()) {
            bad_appendix.push(row.appendix.clone());
        }
        if !row.purpose.is_empty() && !PURPOSE_CODES.contains(&row.purpose.as_str()) {
            bad_purpose.push(row.purpose.clone());
        }
        if !row.source.is_empty() && !SOURCE_CODES.contains(&row.source.as_str()) {
            bad_source.push(row.source.clone());
        }
        if let Some(year) = row.year {
            if !(MIN_YEAR..=current_year).contains(&year) {
                bad_year.push(year.to_string());
            }
        }
    }

    let domain_check = |name: &str, mut bad: Vec<String>, severity: Severity| {
        if bad.is_empty() {
            CheckResult::pass(name, "all values within domain")
        } else {
            let count = bad.len();
            bad.truncate(SAMPLE_LIMIT);
            CheckResult::fail(
                name,
                severity,
                format!("{} values outside domain", count),
                bad,
            )
        }
    };

    // A value outside its fixed code set means the extraction or the
    // source export is corrupt; merging it would poison production.
    vec![
        domain_check("appendix_domain", bad_appendix, Severity::Critical),
        domain_check("purpose_domain", bad_purpose, Severity::Critical),
        domain_check("source_domain", bad_source, Severity::Critical),
        domain_check("year_range", bad_year, Severity::Critical),
    ]
}

/// The validation gate. Holds a pool plus thresholds.
pub struct ValidationGate {
    pool: PgPool,
    latency_threshold: Duration,
}

impl ValidationGate {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            latency_threshold: Duration::from_secs(2),
        }
    }

    pub fn with_latency_threshold(mut self, threshold: Duration) -> Self {
        self.latency_threshold = threshold;
        self
    }

    /// Run the full battery and assemble the report.
    pub async fn run(&self, expected_count: Option<i64>) -> Result<ValidationReport> {
        let staging_count = self.staging_count().await?;
        let mut checks = Vec::new();

        checks.push(check_count(staging_count, expected_count));
        checks.push(self.check_species_integrity().await?);

        let rows = self.fetch_domain_rows().await?;
        checks.extend(check_domains(&rows, Utc::now().year()));

        checks.push(self.check_duplicates().await?);
        checks.push(self.check_query_latency().await?);

        let report = ValidationReport::from_checks(staging_count, expected_count, checks)
            .with_summary(summarize_staging(&rows));
        for check in report.checks.iter().filter(|c| !c.passed) {
            warn!(
                check = %check.check_name,
                severity = ?check.severity,
                details = %check.details,
                "Validation check failed"
            );
        }
        info!(status = ?report.status, "Validation gate complete");
        Ok(report)
    }

    async fn staging_count(&self) -> Result<i64> {
        let query = format!("SELECT COUNT(*) FROM {}", STAGING_TABLE);
        let (count,): (i64,) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn fetch_domain_rows(&self) -> Result<Vec<DomainRow>> {
        let query = format!(
            "SELECT species_id, appendix, purpose, source, year FROM {}",
            STAGING_TABLE
        );
        let rows = sqlx::query_as::<_, DomainRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Null or unknown species ids are fatal: they would either violate the
    /// FK on merge or silently attach trade to the wrong species.
    async fn check_species_integrity(&self) -> Result<CheckResult> {
        const NAME: &str = "species_integrity";
        let query = format!(
            "SELECT COUNT(*) FROM {} s LEFT JOIN {} sp ON s.species_id = sp.id \
             WHERE s.species_id IS NULL OR sp.id IS NULL",
            STAGING_TABLE, SPECIES_TABLE
        );
        let (orphans,): (i64,) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        if orphans == 0 {
            Ok(CheckResult::pass(NAME, "every row resolves to a registry species"))
        } else {
            Ok(CheckResult::fail(
                NAME,
                Severity::Critical,
                format!("{} rows with null or unknown species_id", orphans),
                vec![],
            ))
        }
    }

    /// Duplicate natural keys inside staging would be inserted twice by the
    /// merge, so they fail the gate outright.
    async fn check_duplicates(&self) -> Result<CheckResult> {
        const NAME: &str = "staging_duplicates";
        let query = format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM {} GROUP BY species_id, year, appendix, \
             taxon, importer, exporter, term, purpose, source HAVING COUNT(*) > 1) d",
            STAGING_TABLE
        );
        let (groups,): (i64,) = sqlx::query_as(&query).fetch_one(&self.pool).await?;
        if groups == 0 {
            Ok(CheckResult::pass(NAME, "no duplicate natural keys in staging"))
        } else {
            Ok(CheckResult::fail(
                NAME,
                Severity::Critical,
                format!("{} natural keys appear more than once", groups),
                vec![],
            ))
        }
    }

    /// Representative queries, timed. Slow answers are worth knowing about
    /// but never block a merge.
    async fn check_query_latency(&self) -> Result<CheckResult> {
        const NAME: &str = "query_latency";
        let queries = [
            format!("SELECT COUNT(*) FROM {}", STAGING_TABLE),
            format!(
                "SELECT species_id, COUNT(*) FROM {} GROUP BY species_id",
                STAGING_TABLE
            ),
            format!(
                "SELECT year, COUNT(*) FROM {} WHERE year IS NOT NULL GROUP BY year ORDER BY year",
                STAGING_TABLE
            ),
        ];

        let mut slow = Vec::new();
        let mut worst = Duration::ZERO;
        for query in &queries {
            let start = Instant::now();
            let rows = sqlx::query(query).fetch_all(&self.pool).await?;
            let elapsed = start.elapsed();
            let _ = rows.first().map(|r| r.len());
            worst = worst.max(elapsed);
            if elapsed > self.latency_threshold {
                slow.push(format!("{} ({} ms)", query, elapsed.as_millis()));
            }
        }

        if slow.is_empty() {
            Ok(CheckResult::pass(
                NAME,
                format!("worst query {} ms", worst.as_millis()),
            ))
        } else {
            Ok(CheckResult::fail(
                NAME,
                Severity::Warning,
                format!(
                    "{} of {} queries exceeded {} ms",
                    slow.len(),
                    queries.len(),
                    self.latency_threshold.as_millis()
                ),
                slow,
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn row(appendix: &str, purpose: &str, source: &str, year: Option<i32>) -> DomainRow {
        DomainRow {
            species_id: Uuid::nil(),
            appendix: appendix.to_string(),
            purpose: purpose.to_string(),
            source: source.to_string(),
            year,
        }
    }

    #[test]
    fn test_clean_rows_pass_all_domain_checks() {
        let rows = vec![
            row("II", "T", "W", Some(2001)),
            row("I", "S", "C", Some(1975)),
            row("N", "", "", None),
        ];
        let checks = check_domains(&rows, 2026);
        assert!(checks.iter().all(|c| c.passed));
    }

    #[test]
    fn test_corrupt_appendix_is_critical() {
        let rows = vec![row("IV", "T", "W", Some(2001))];
        let checks = check_domains(&rows, 2026);
        let appendix = checks.iter().find(|c| c.check_name == "appendix_domain").unwrap();
        assert!(!appendix.passed);
        assert_eq!(appendix.severity, Severity::Critical);
        assert_eq!(appendix.offending_samples, vec!["IV"]);
    }

    #[test]
    fn test_unknown_codes_are_critical() {
        let rows = vec![row("II", "ZZ", "K", Some(2001))];
        let checks = check_domains(&rows, 2026);
        let purpose = checks.iter().find(|c| c.check_name == "purpose_domain").unwrap();
        let source = checks.iter().find(|c| c.check_name == "source_domain").unwrap();
        assert!(!purpose.passed);
        assert_eq!(purpose.severity, Severity::Critical);
        assert!(!source.passed);
        assert_eq!(source.severity, Severity::Critical);
    }

    #[test]
    fn test_year_out_of_range_is_critical() {
        let rows = vec![
            row("II", "T", "W", Some(1903)),
            row("II", "T", "W", Some(2099)),
        ];
        let checks = check_domains(&rows, 2026);
        let year = checks.iter().find(|c| c.check_name == "year_range").unwrap();
        assert!(!year.passed);
        assert_eq!(year.severity, Severity::Critical);
        assert_eq!(year.offending_samples, vec!["1903", "2099"]);
    }

    #[test]
    fn test_bad_codes_block_the_merge() {
        // One row with a bad purpose, a bad source, and a pre-treaty year
        // must hard-fail the gate, not pass with warnings.
        let rows = vec![row("II", "ZZ", "K", Some(1950))];
        let checks = check_domains(&rows, 2026);
        let report = ValidationReport::from_checks(1, Some(1), checks);
        assert_eq!(report.status, ValidationStatus::Failed);
        assert!(!report.status.may_proceed());
    }

    #[test]
    fn test_count_shortfall_tolerance() {
        // Under 10% short: warning.
        let small = check_count(95, Some(100));
        assert!(!small.passed);
        assert_eq!(small.severity, Severity::Warning);

        // 10% or more short: critical.
        let large = check_count(90, Some(100));
        assert!(!large.passed);
        assert_eq!(large.severity, Severity::Critical);

        // Excess is a warning.
        let excess = check_count(110, Some(100));
        assert!(!excess.passed);
        assert_eq!(excess.severity, Severity::Warning);

        assert!(check_count(100, Some(100)).passed);
        assert!(check_count(100, None).passed);
    }

    #[test]
    fn test_verdict_derivation() {
        let passed = ValidationReport::from_checks(1, None, vec![CheckResult::pass("a", "")]);
        assert_eq!(passed.status, ValidationStatus::Passed);
        assert!(passed.status.may_proceed());

        let warned = ValidationReport::from_checks(
            1,
            None,
            vec![CheckResult::fail("a", Severity::Warning, "", vec![])],
        );
        assert_eq!(warned.status, ValidationStatus::PassedWithWarnings);
        assert!(warned.status.may_proceed());

        let failed = ValidationReport::from_checks(
            1,
            None,
            vec![
                CheckResult::pass("a", ""),
                CheckResult::fail("b", Severity::Critical, "", vec![]),
            ],
        );
        assert_eq!(failed.status, ValidationStatus::Failed);
        assert!(!failed.status.may_proceed());
    }

    #[test]
    fn test_staging_summary() {
        let mut rows = vec![
            row("II", "T", "W", Some(2001)),
            row("II", "T", "W", Some(1988)),
            row("I", "T", "W", None),
        ];
        rows[0].species_id = Uuid::new_v4();
        rows[1].species_id = rows[0].species_id;
        rows[2].species_id = Uuid::new_v4();

        let summary = summarize_staging(&rows);
        assert_eq!(summary.unique_species, 2);
        assert_eq!(summary.min_year, Some(1988));
        assert_eq!(summary.max_year, Some(2001));
        assert_eq!(summary.appendix_counts["II"], 2);
        assert_eq!(summary.appendix_counts["I"], 1);
    }

    #[test]
    fn test_report_is_written_even_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/validation_report.json");
        let report = ValidationReport::from_checks(
            0,
            Some(100),
            vec![CheckResult::fail("record_count", Severity::Critical, "empty", vec![])],
        );
        report.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let restored: ValidationReport = serde_json::from_str(&text).unwrap();
        assert_eq!(restored.status, ValidationStatus::Failed);
    }
}
