//! Stage outcome taxonomy
//!
//! Every pipeline stage reports one of three outcomes. The orchestrator
//! refuses to start a stage whose predecessor failed.

use serde::{Deserialize, Serialize};

/// Typed outcome of a pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    SucceededWithWarnings { warnings: Vec<String> },
    Failed { reason: String },
}

impl StageOutcome {
    pub fn with_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            StageOutcome::Succeeded
        } else {
            StageOutcome::SucceededWithWarnings { warnings }
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        StageOutcome::Failed {
            reason: reason.into(),
        }
    }

    /// Whether the next stage may start.
    pub fn may_proceed(&self) -> bool {
        !matches!(self, StageOutcome::Failed { .. })
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            StageOutcome::SucceededWithWarnings { warnings } => warnings,
            _ => &[],
        }
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutcome::Succeeded => write!(f, "succeeded"),
            StageOutcome::SucceededWithWarnings { warnings } => {
                write!(f, "succeeded with {} warning(s)", warnings.len())
            },
            StageOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_may_proceed() {
        assert!(StageOutcome::Succeeded.may_proceed());
        assert!(StageOutcome::with_warnings(vec!["late data".into()]).may_proceed());
        assert!(!StageOutcome::failed("count mismatch").may_proceed());
    }

    #[test]
    fn test_empty_warnings_collapse_to_success() {
        assert_eq!(StageOutcome::with_warnings(vec![]), StageOutcome::Succeeded);
    }
}
