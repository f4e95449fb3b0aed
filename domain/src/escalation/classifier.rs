//! Escalation classifier
//!
//! Pure decision logic: given the failure that just happened and the
//! trailing run of failures before it, decide whether to hand the session
//! to a human. The same inputs always produce the same decision.

use super::entities::{ErrorCategory, ErrorSignature, EscalationRecord, Severity};
use serde::{Deserialize, Serialize};

/// Number of consecutive identical error signatures that force an
/// escalation regardless of severity (loop detection).
const LOOP_SIGNATURE_COUNT: usize = 3;

/// One observed failure, as seen by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSignal {
    pub category: ErrorCategory,
    /// Severity the reporter declared, if any; otherwise derived from
    /// the category.
    pub severity: Option<Severity>,
    pub message: String,
}

impl FailureSignal {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            severity: None,
            message: message.into(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or(self.category.default_severity())
    }

    pub fn signature(&self) -> ErrorSignature {
        ErrorSignature::of(self.category, &self.message)
    }
}

/// Outcome of classification.
#[derive(Debug)]
pub struct ClassifierDecision {
    pub should_escalate: bool,
    /// Present exactly when `should_escalate` is true.
    pub record: Option<EscalationRecord>,
}

impl ClassifierDecision {
    fn retry() -> Self {
        Self {
            should_escalate: false,
            record: None,
        }
    }

    fn escalate(record: EscalationRecord) -> Self {
        Self {
            should_escalate: true,
            record: Some(record),
        }
    }
}

/// Decides when automated retries stop and a human takes over.
///
/// Two rules, checked in order:
///
/// 1. **Loop rule** — [`LOOP_SIGNATURE_COUNT`] consecutive identical
///    signatures escalate immediately, whatever the severity says. This
///    bounds the worst-case iteration count for low-severity loops.
/// 2. **Severity ladder** — each severity tolerates a fixed number of
///    repeats of the same *category* ([`Severity::tolerated_repeats`]);
///    Critical failures escalate on first sight.
#[derive(Debug, Default, Clone)]
pub struct EscalationClassifier;

impl EscalationClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify the latest failure.
    ///
    /// `prior` is the trailing run of consecutive failure signals before
    /// `current`, oldest first. A successful turn resets the run, so the
    /// caller must not include failures from before the last success.
    /// `attempted_iterations` is recorded in the escalation record.
    pub fn classify(
        &self,
        current: &FailureSignal,
        prior: &[FailureSignal],
        attempted_iterations: u64,
    ) -> ClassifierDecision {
        let severity = current.severity();
        let signature = current.signature();

        let identical_run = 1 + prior
            .iter()
            .rev()
            .take_while(|s| s.signature() == signature)
            .count();
        if identical_run >= LOOP_SIGNATURE_COUNT {
            return ClassifierDecision::escalate(EscalationRecord::new(
                current.category,
                severity,
                format!(
                    "Same failure repeated {} times in a row: {}",
                    identical_run,
                    signature.as_str()
                ),
                attempted_iterations,
            ));
        }

        let category_run = 1 + prior
            .iter()
            .rev()
            .take_while(|s| s.category == current.category)
            .count();
        // category_run counts the current failure; repeats = run - 1
        if category_run - 1 > severity.tolerated_repeats() {
            return ClassifierDecision::escalate(EscalationRecord::new(
                current.category,
                severity,
                format!(
                    "{} failure repeated beyond the {} retry budget: {}",
                    current.category,
                    severity,
                    crate::core::string::first_line(&current.message)
                ),
                attempted_iterations,
            ));
        }

        if severity == Severity::Critical {
            return ClassifierDecision::escalate(EscalationRecord::new(
                current.category,
                severity,
                crate::core::string::first_line(&current.message).to_string(),
                attempted_iterations,
            ));
        }

        ClassifierDecision::retry()
    }
}
