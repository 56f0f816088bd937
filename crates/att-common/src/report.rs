//! Per-run machine-readable report
//!
//! Each CLI invocation writes one timestamped JSON report. These files are
//! the externally observable contract for "did this run succeed and what
//! changed" — human-readable console output is a courtesy, the report is
//! authoritative.

use crate::error::Result;
use crate::stage::StageOutcome;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level report for a single pipeline run (or a single stage run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Which stage(s) this report covers, e.g. "extract" or "run".
    pub stage: String,

    /// ISO 8601 timestamp of report creation.
    pub created_at: String,

    /// Whether this was a dry run (all reads, no writes).
    pub dry_run: bool,

    pub outcome: StageOutcome,

    /// Stage-specific statistics, serialized by the producing stage.
    pub details: serde_json::Value,
}

impl RunReport {
    pub fn new(stage: impl Into<String>, dry_run: bool, outcome: StageOutcome) -> Self {
        Self {
            stage: stage.into(),
            created_at: Utc::now().to_rfc3339(),
            dry_run,
            outcome,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details<T: Serialize>(mut self, details: &T) -> Result<Self> {
        self.details = serde_json::to_value(details)?;
        Ok(self)
    }

    /// Persist to `<dir>/<stage>_report_<YYYYmmdd_HHMMSS>.json` and return
    /// the written path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{}_report_{}.json", self.stage, stamp));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Stats {
        scanned: u64,
        matched: u64,
    }

    #[test]
    fn test_report_round_trip() {
        let report = RunReport::new("extract", false, StageOutcome::Succeeded)
            .with_details(&Stats {
                scanned: 1_000_000,
                matched: 512,
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = report.save(dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("extract_report_"));

        let loaded: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.stage, "extract");
        assert_eq!(loaded.outcome, StageOutcome::Succeeded);
        assert_eq!(loaded.details["matched"], 512);
    }

    #[test]
    fn test_dry_run_report_same_shape() {
        let wet = RunReport::new("merge", false, StageOutcome::Succeeded);
        let dry = RunReport::new("merge", true, StageOutcome::Succeeded);
        let wet_json = serde_json::to_value(&wet).unwrap();
        let dry_json = serde_json::to_value(&dry).unwrap();
        let keys = |v: &serde_json::Value| {
            v.as_object().unwrap().keys().cloned().collect::<Vec<_>>()
        };
        assert_eq!(keys(&wet_json), keys(&dry_json));
    }
}
