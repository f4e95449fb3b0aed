//! Agent runner port
//!
//! Defines how the application layer runs a single agent turn. The two
//! concrete roles (Planner, Executor) differ only in the prompt they
//! receive and the report they emit — supervision is identical, so there
//! is exactly one port and the role travels in the request.
//!
//! The infrastructure implementation spawns an external process; tests
//! inject a scripted fake.

use async_trait::async_trait;
use duet_domain::{AgentEvent, AgentRole, ErrorCategory, SessionId};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors that prevent a turn from producing an outcome at all.
///
/// Failures *of* a turn (timeout, crash, malformed output) are not
/// errors here — they come back as [`TurnResult::Failed`] so the caller
/// can record them as error iterations with their partial events.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to spawn agent process: {0}")]
    Spawn(String),

    #[error("Timed out waiting for a process pool slot")]
    PoolTimeout,

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Runner I/O error: {0}")]
    Io(String),
}

/// One turn request.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: SessionId,
    pub role: AgentRole,
    /// Directive or prompt text delivered to the agent's stdin
    pub input: String,
    /// Wall-clock bound for the whole turn; there is no wait-forever
    pub timeout: Duration,
    /// Cancelling this token terminates the child immediately
    pub cancellation: CancellationToken,
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnResult {
    /// The agent emitted its sentinel structured report
    Report(Value),
    /// The turn failed; recorded as an error iteration
    Failed {
        category: ErrorCategory,
        message: String,
    },
}

/// Everything observed during one turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Events in arrival order, sequence numbers starting at 0
    pub events: Vec<AgentEvent>,
    pub result: TurnResult,
    pub duration: Duration,
}

impl TurnOutcome {
    /// Convenience for building failed outcomes.
    pub fn failed(
        events: Vec<AgentEvent>,
        category: ErrorCategory,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            events,
            result: TurnResult::Failed {
                category,
                message: message.into(),
            },
            duration,
        }
    }
}

/// Port for running agent turns.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one turn to completion, timeout, crash, or cancellation.
    ///
    /// Implementations guarantee that all process resources are released
    /// before returning, on every path.
    async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, RunnerError>;

    /// Drop any warm process kept for this session (session-affinity
    /// reuse). No-op for per-turn spawning.
    async fn release_session(&self, _session_id: &SessionId) {}
}
