//! Work decomposition entities
//!
//! [`WorkItem`]s are produced by Planner decomposition and consumed by the
//! instruction builder. They outlive any single session iteration and are
//! referenced by id from iteration records.

use serde::{Deserialize, Serialize};

/// Priority of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

/// Status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    /// Waiting to be picked up
    #[default]
    Pending,
    /// Currently being worked by the Executor
    InProgress,
    /// Finished and accepted
    Done,
    /// Cannot proceed until a dependency or human unblocks it
    Blocked,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::InProgress => "in_progress",
            WorkItemStatus::Done => "done",
            WorkItemStatus::Blocked => "blocked",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, WorkItemStatus::Pending | WorkItemStatus::InProgress)
    }
}

/// A unit of work produced by Planner decomposition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Identifier assigned by the Planner (stable across iterations)
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,
    /// Work items that must be done before this one
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Current status
    #[serde(default)]
    pub status: WorkItemStatus,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority: Priority::default(),
            depends_on: Vec::new(),
            status: WorkItemStatus::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    /// A pending item is ready once all of its dependencies are done.
    pub fn is_ready(&self, done_ids: &[String]) -> bool {
        self.status == WorkItemStatus::Pending
            && self.depends_on.iter().all(|dep| done_ids.contains(dep))
    }
}

/// Result of a named quality gate applied to an Executor report.
///
/// Never mutated after creation; attached to the iteration it was
/// evaluated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    /// Gate name (e.g. "tests", "lint", "build")
    pub gate: String,
    /// Whether the gate passed
    pub passed: bool,
    /// Supporting evidence reported by the Executor
    #[serde(default)]
    pub evidence: String,
}

impl QualityGateResult {
    pub fn new(gate: impl Into<String>, passed: bool, evidence: impl Into<String>) -> Self {
        Self {
            gate: gate.into(),
            passed,
            evidence: evidence.into(),
        }
    }
}
