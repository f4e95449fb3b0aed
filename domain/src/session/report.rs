//! Structured report parsing.
//!
//! Each agent turn ends with a sentinel structured-report event. This
//! module interprets that payload: a [`PlannerDecision`] (hand a directive
//! to the Executor, or declare the task done) or an [`ExecutorReport`]
//! (success with quality-gate evidence, or a reported failure).
//!
//! The wire payloads come from an opaque external binary: unknown fields
//! are ignored, missing optional fields default, and a shape that cannot
//! be interpreted at all is a [`DomainError::MalformedReport`] rather
//! than a panic.

use crate::core::error::DomainError;
use crate::escalation::classifier::FailureSignal;
use crate::escalation::entities::{ErrorCategory, Severity};
use crate::work::entities::{QualityGateResult, WorkItem};
use serde_json::Value;

/// What the Planner decided at the end of its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannerDecision {
    /// More work: a directive for the Executor, plus any newly
    /// decomposed work items.
    Directive {
        directive: String,
        work_items: Vec<WorkItem>,
    },
    /// Terminal: nothing left to do.
    Complete { summary: String },
}

impl PlannerDecision {
    /// Parse a planner report payload.
    ///
    /// Expected shape:
    /// ```json
    /// {"type": "report", "role": "planner", "decision": "directive",
    ///  "directive": "...", "work_items": [{"id": "...", "title": "..."}]}
    /// ```
    /// or `{"decision": "complete", "summary": "..."}`.
    pub fn parse(payload: &Value) -> Result<Self, DomainError> {
        let decision = payload
            .get("decision")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DomainError::MalformedReport("planner report has no decision".into()))?;

        match decision {
            "directive" => {
                let directive = payload
                    .get("directive")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| {
                        DomainError::MalformedReport(
                            "directive decision without directive text".into(),
                        )
                    })?;
                let work_items = payload
                    .get("work_items")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| serde_json::from_value(v.clone()).ok())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(PlannerDecision::Directive {
                    directive: directive.to_string(),
                    work_items,
                })
            }
            "complete" => {
                let summary = payload
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Task complete")
                    .to_string();
                Ok(PlannerDecision::Complete { summary })
            }
            other => Err(DomainError::MalformedReport(format!(
                "unknown planner decision: {other}"
            ))),
        }
    }
}

/// Status the Executor reported for its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Success,
    Error,
}

/// Failure details inside an executor report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedFailure {
    pub category: ErrorCategory,
    /// Severity the agent declared, if any
    pub severity: Option<Severity>,
    pub message: String,
}

impl ReportedFailure {
    pub fn to_signal(&self) -> FailureSignal {
        let signal = FailureSignal::new(self.category, self.message.clone());
        match self.severity {
            Some(severity) => signal.with_severity(severity),
            None => signal,
        }
    }
}

/// The Executor's account of its turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorReport {
    pub status: ReportStatus,
    pub summary: String,
    /// Quality-gate evidence; empty when the agent reported none
    pub gates: Vec<QualityGateResult>,
    /// Present exactly when `status == Error`
    pub failure: Option<ReportedFailure>,
    /// Work item ids the Executor claims finished this turn
    pub completed_items: Vec<String>,
}

impl ExecutorReport {
    /// Parse an executor report payload.
    ///
    /// Expected shape:
    /// ```json
    /// {"type": "report", "role": "executor", "status": "success",
    ///  "summary": "...", "gates": [{"gate": "tests", "passed": true}],
    ///  "completed_items": ["w1"]}
    /// ```
    /// Error reports add `"error": {"category": "...", "message": "..."}`.
    pub fn parse(payload: &Value) -> Result<Self, DomainError> {
        let status = match payload.get("status").and_then(|v| v.as_str()) {
            Some("success") => ReportStatus::Success,
            Some("error") => ReportStatus::Error,
            Some(other) => {
                return Err(DomainError::MalformedReport(format!(
                    "unknown executor status: {other}"
                )));
            }
            None => {
                return Err(DomainError::MalformedReport(
                    "executor report has no status".into(),
                ));
            }
        };

        let summary = payload
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let gates = payload
            .get("gates")
            .and_then(|v| v.as_array())
            .map(|gates| {
                gates
                    .iter()
                    .filter_map(|g| {
                        Some(QualityGateResult::new(
                            g.get("gate").and_then(|v| v.as_str())?,
                            g.get("passed").and_then(|v| v.as_bool()).unwrap_or(false),
                            g.get("evidence").and_then(|v| v.as_str()).unwrap_or(""),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let completed_items = payload
            .get("completed_items")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let failure = match status {
            ReportStatus::Success => None,
            ReportStatus::Error => {
                let error = payload.get("error");
                let category = error
                    .and_then(|e| e.get("category"))
                    .and_then(|v| v.as_str())
                    .map(ErrorCategory::parse)
                    .unwrap_or(ErrorCategory::Other);
                let severity = error
                    .and_then(|e| e.get("severity"))
                    .and_then(|v| v.as_str())
                    .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok());
                let message = error
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(&summary)
                    .to_string();
                Some(ReportedFailure {
                    category,
                    severity,
                    message,
                })
            }
        };

        Ok(Self {
            status,
            summary,
            gates,
            failure,
            completed_items,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}

/// Which role a report payload claims to come from, when stated.
pub fn report_role(payload: &Value) -> Option<&str> {
    payload.get("role").and_then(|v| v.as_str())
}
