//! Session domain entities
//!
//! A [`Session`] is one coordinated run of a task: an ordered, append-only
//! sequence of [`Iteration`]s, each recording a single agent turn and its
//! outcome.

use super::event::AgentEvent;
use crate::escalation::entities::{ErrorCategory, EscalationRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which agent acted in a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Strategic decomposition, review, escalation
    Planner,
    /// Focused implementation
    Executor,
}

impl AgentRole {
    pub fn as_str(&self) -> &str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Executor => "executor",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Automated processing is active
    Running,
    /// Escalated; waiting for a human to resolve and resume
    Paused,
    /// Task finished successfully
    Completed,
    /// Unrecoverable failure
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Terminal states never resume automated processing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a single iteration ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IterationOutcome {
    /// The loop continues with another turn
    Continue,
    /// The task is done; the session completes
    Complete,
    /// Control was handed to a human
    Escalate,
    /// The turn failed (timeout, crash, malformed output, ...)
    Error {
        category: ErrorCategory,
        message: String,
    },
}

impl IterationOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            IterationOutcome::Continue => "continue",
            IterationOutcome::Complete => "complete",
            IterationOutcome::Escalate => "escalate",
            IterationOutcome::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, IterationOutcome::Error { .. })
    }
}

/// The persisted record of one agent turn (Entity).
///
/// Immutable once written; iterations are append-only within a session
/// and their sequence numbers are contiguous from 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub seq: u64,
    pub role: AgentRole,
    /// The input handed to the agent for this turn
    pub directive: String,
    /// Parsed events, in arrival order
    pub events: Vec<AgentEvent>,
    pub outcome: IterationOutcome,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Iteration {
    /// Compact single-line digest for prompts and transcripts.
    pub fn digest(&self) -> String {
        let gist = match &self.outcome {
            IterationOutcome::Error { category, message } => {
                format!("{}: {}", category, crate::core::string::first_line(message))
            }
            other => other.as_str().to_string(),
        };
        format!("#{} {} -> {}", self.seq, self.role, gist)
    }
}

/// A coordinated run of one task (Entity).
///
/// Owns the ordered iteration history. Only the coordination state
/// machine mutates a session; everything else reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// The task description submitted by the user
    pub task: String,
    /// Working directory the agents operate in
    pub working_dir: Option<String>,
    pub status: SessionStatus,
    /// Present exactly while the session is paused on an escalation
    pub escalation: Option<EscalationRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iterations: Vec<Iteration>,
}

impl Session {
    pub fn new(task: impl Into<String>, working_dir: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            task: task.into(),
            working_dir,
            status: SessionStatus::Running,
            escalation: None,
            created_at: now,
            updated_at: now,
            iterations: Vec::new(),
        }
    }

    /// Sequence number the next iteration must carry.
    pub fn next_seq(&self) -> u64 {
        self.iterations.len() as u64
    }

    /// Append an iteration, enforcing the contiguous-sequence invariant.
    ///
    /// # Panics
    ///
    /// Panics if `iteration.seq` is not exactly `next_seq()`. The state
    /// machine is the only writer, so a gap here is a programming error,
    /// not a runtime condition.
    pub fn push_iteration(&mut self, iteration: Iteration) {
        assert_eq!(
            iteration.seq,
            self.next_seq(),
            "iteration sequence must be contiguous"
        );
        self.updated_at = iteration.ended_at;
        self.iterations.push(iteration);
    }

    /// Pause on an escalation. Always pairs record creation with the
    /// status change; there is no silent-continue path.
    pub fn pause_with(&mut self, record: EscalationRecord) {
        self.escalation = Some(record);
        self.status = SessionStatus::Paused;
        self.updated_at = Utc::now();
    }

    /// Clear a resolved escalation and return to automated processing.
    pub fn resume(&mut self) {
        self.escalation = None;
        self.status = SessionStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self) {
        self.status = SessionStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Trailing run of consecutive error iterations, oldest first.
    ///
    /// This is the history slice the escalation classifier looks at; a
    /// successful turn resets it.
    pub fn trailing_errors(&self) -> Vec<&Iteration> {
        let mut run: Vec<&Iteration> = self
            .iterations
            .iter()
            .rev()
            .take_while(|it| it.outcome.is_error())
            .collect();
        run.reverse();
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iteration(seq: u64, outcome: IterationOutcome) -> Iteration {
        let now = Utc::now();
        Iteration {
            seq,
            role: AgentRole::Executor,
            directive: "do the thing".to_string(),
            events: Vec::new(),
            outcome,
            duration_ms: 10,
            started_at: now,
            ended_at: now,
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new("Add a retry flag", None);
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.next_seq(), 0);

        session.push_iteration(iteration(0, IterationOutcome::Continue));
        session.push_iteration(iteration(1, IterationOutcome::Complete));
        assert_eq!(session.next_seq(), 2);

        session.complete();
        assert!(session.status.is_terminal());
    }

    #[test]
    #[should_panic(expected = "contiguous")]
    fn test_gapped_iteration_rejected() {
        let mut session = Session::new("task", None);
        session.push_iteration(iteration(1, IterationOutcome::Continue));
    }

    #[test]
    fn test_pause_attaches_record() {
        use crate::escalation::entities::{ErrorCategory, EscalationRecord, Severity};

        let mut session = Session::new("task", None);
        session.pause_with(EscalationRecord::new(
            ErrorCategory::Timeout,
            Severity::Medium,
            "looping",
            3,
        ));
        assert_eq!(session.status, SessionStatus::Paused);
        assert!(session.escalation.is_some());

        session.resume();
        assert_eq!(session.status, SessionStatus::Running);
        assert!(session.escalation.is_none());
    }

    #[test]
    fn test_trailing_errors_reset_by_success() {
        let mut session = Session::new("task", None);
        let error = || IterationOutcome::Error {
            category: ErrorCategory::Timeout,
            message: "hung".to_string(),
        };
        session.push_iteration(iteration(0, error()));
        session.push_iteration(iteration(1, IterationOutcome::Continue));
        session.push_iteration(iteration(2, error()));
        session.push_iteration(iteration(3, error()));

        let trailing = session.trailing_errors();
        assert_eq!(trailing.len(), 2);
        assert_eq!(trailing[0].seq, 2);
        assert_eq!(trailing[1].seq, 3);
    }

    #[test]
    fn test_iteration_digest() {
        let it = iteration(
            4,
            IterationOutcome::Error {
                category: ErrorCategory::ProcessCrash,
                message: "exit 139\nlong backtrace".to_string(),
            },
        );
        assert_eq!(it.digest(), "#4 executor -> process_crash: exit 139");
    }
}
