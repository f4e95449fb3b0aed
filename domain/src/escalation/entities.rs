//! Escalation entities
//!
//! Failure categories, severities, error signatures, and the
//! [`EscalationRecord`] handed to a human operator when automated
//! processing gives up.

use crate::core::string::first_line;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a failed turn or failed review.
///
/// This is the error taxonomy shared by the supervisor (which produces
/// `Timeout` / `ProcessCrash` / `MalformedOutput`), the review step
/// (`QualityGateFailure`), the store (`StoreCorruption`), and agent
/// reports themselves (`Security` / `DataCorruption` signals).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The turn exceeded its wall-clock timeout
    Timeout,
    /// The agent process exited abnormally
    ProcessCrash,
    /// The output stream ended without a structured report
    MalformedOutput,
    /// A quality gate rejected the Executor's report
    QualityGateFailure,
    /// The session store detected inconsistent history
    StoreCorruption,
    /// The agent reported a security-classified failure
    Security,
    /// The agent reported data loss or corruption
    DataCorruption,
    /// Anything the taxonomy doesn't name
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ProcessCrash => "process_crash",
            ErrorCategory::MalformedOutput => "malformed_output",
            ErrorCategory::QualityGateFailure => "quality_gate_failure",
            ErrorCategory::StoreCorruption => "store_corruption",
            ErrorCategory::Security => "security",
            ErrorCategory::DataCorruption => "data_corruption",
            ErrorCategory::Other => "other",
        }
    }

    /// Parse a category reported by an agent, falling back to `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "timeout" => ErrorCategory::Timeout,
            "process_crash" | "crash" => ErrorCategory::ProcessCrash,
            "malformed_output" => ErrorCategory::MalformedOutput,
            "quality_gate_failure" | "gate_failure" => ErrorCategory::QualityGateFailure,
            "store_corruption" => ErrorCategory::StoreCorruption,
            "security" => ErrorCategory::Security,
            "data_corruption" | "data_loss" => ErrorCategory::DataCorruption,
            _ => ErrorCategory::Other,
        }
    }

    /// Default severity assigned to failures of this category.
    pub fn default_severity(&self) -> Severity {
        match self {
            ErrorCategory::Security
            | ErrorCategory::DataCorruption
            | ErrorCategory::StoreCorruption => Severity::Critical,
            ErrorCategory::ProcessCrash | ErrorCategory::MalformedOutput => Severity::High,
            ErrorCategory::Timeout => Severity::Medium,
            ErrorCategory::QualityGateFailure | ErrorCategory::Other => Severity::Low,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of a failure, driving the retry budget before escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    /// How many *repeats* of the same failure category are tolerated
    /// before escalating. The first failure is not a repeat, so a budget
    /// of 1 means the second same-category failure escalates.
    pub fn tolerated_repeats(&self) -> usize {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized identity of a failure, used for loop detection.
///
/// Two failures with the same signature are "the same error happening
/// again": same category, same first line of the message (case-folded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorSignature(String);

impl ErrorSignature {
    pub fn of(category: ErrorCategory, message: &str) -> Self {
        Self(format!(
            "{}:{}",
            category.as_str(),
            first_line(message).to_ascii_lowercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Record handed to a human when automated processing stops.
///
/// Created only by the classifier. Creating one always pauses the
/// session; the record stays attached until a human resolves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub category: ErrorCategory,
    pub severity: Severity,
    /// What went wrong, in terms a human can act on
    pub description: String,
    /// Iterations spent before giving up
    pub attempted_iterations: u64,
    /// Suggested next step for the operator
    pub recommended_action: String,
    pub created_at: DateTime<Utc>,
}

impl EscalationRecord {
    pub fn new(
        category: ErrorCategory,
        severity: Severity,
        description: impl Into<String>,
        attempted_iterations: u64,
    ) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            attempted_iterations,
            recommended_action: Self::recommended_action_for(category).to_string(),
            created_at: Utc::now(),
        }
    }

    fn recommended_action_for(category: ErrorCategory) -> &'static str {
        match category {
            ErrorCategory::Timeout => {
                "Inspect the last directive for over-broad scope, then resume with a longer timeout or a narrower task"
            }
            ErrorCategory::ProcessCrash | ErrorCategory::MalformedOutput => {
                "Check the agent binary and its environment, then resume the session"
            }
            ErrorCategory::QualityGateFailure => {
                "Review the failing gate evidence and either fix manually or relax the gate"
            }
            ErrorCategory::StoreCorruption => {
                "Inspect the session file; history was rolled back to the last intact iteration"
            }
            ErrorCategory::Security => {
                "Audit the working directory before any further automated runs"
            }
            ErrorCategory::DataCorruption => {
                "Verify repository state (git status/stash) before resuming"
            }
            ErrorCategory::Other => "Review the session transcript and resume or abandon",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_fallback() {
        assert_eq!(ErrorCategory::parse("timeout"), ErrorCategory::Timeout);
        assert_eq!(
            ErrorCategory::parse("process-crash"),
            ErrorCategory::ProcessCrash
        );
        assert_eq!(ErrorCategory::parse("SECURITY"), ErrorCategory::Security);
        assert_eq!(ErrorCategory::parse("???"), ErrorCategory::Other);
    }

    #[test]
    fn test_severity_ladder() {
        assert_eq!(Severity::Critical.tolerated_repeats(), 0);
        assert_eq!(Severity::High.tolerated_repeats(), 1);
        assert_eq!(Severity::Medium.tolerated_repeats(), 2);
        assert_eq!(Severity::Low.tolerated_repeats(), 3);
    }

    #[test]
    fn test_critical_categories() {
        assert_eq!(
            ErrorCategory::Security.default_severity(),
            Severity::Critical
        );
        assert_eq!(
            ErrorCategory::DataCorruption.default_severity(),
            Severity::Critical
        );
        assert_eq!(ErrorCategory::Timeout.default_severity(), Severity::Medium);
    }

    #[test]
    fn test_signature_normalizes_message() {
        let a = ErrorSignature::of(ErrorCategory::Timeout, "Build Hung\nat step 3");
        let b = ErrorSignature::of(ErrorCategory::Timeout, "  build hung  ");
        assert_eq!(a, b);

        let c = ErrorSignature::of(ErrorCategory::ProcessCrash, "build hung");
        assert_ne!(a, c);
    }
}
