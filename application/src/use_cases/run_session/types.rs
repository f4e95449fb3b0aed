//! Type definitions for the RunSession use case.

use crate::config::ExecutionParams;
use crate::ports::agent_runner::RunnerError;
use crate::ports::session_store::StoreError;
use duet_domain::{DomainError, Session, SessionStatus};
use thiserror::Error;

/// Errors that can occur while driving a session.
#[derive(Error, Debug)]
pub enum RunSessionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Directive construction failed: {0}")]
    Directive(#[from] DomainError),

    #[error("Session history corrupt beyond recovery: {0}")]
    CorruptBeyondRecovery(String),

    #[error("Session {id} cannot resume from status {status}")]
    NotResumable { id: String, status: SessionStatus },

    #[error("Operation cancelled")]
    Cancelled,
}

impl RunSessionError {
    /// Check if this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RunSessionError::Cancelled | RunSessionError::Runner(RunnerError::Cancelled)
        )
    }
}

/// Input for starting a new session.
#[derive(Debug, Clone)]
pub struct RunSessionInput {
    /// The task description
    pub task: String,
    /// Loop control parameters
    pub params: ExecutionParams,
}

impl RunSessionInput {
    pub fn new(task: impl Into<String>, params: ExecutionParams) -> Self {
        Self {
            task: task.into(),
            params,
        }
    }
}

/// Output of a session run (terminal or paused).
#[derive(Debug, Clone)]
pub struct RunSessionOutput {
    /// Final session state, including full iteration history
    pub session: Session,
    /// One-line account of how the run ended
    pub summary: String,
}

impl RunSessionOutput {
    pub fn completed(&self) -> bool {
        self.session.status == SessionStatus::Completed
    }
}
