//! Session progress port.
//!
//! Output port the CLI (or any other front end) implements to display
//! coordination progress. All methods have no-op defaults, so
//! implementers only override the callbacks they care about.

use duet_domain::{
    AgentEvent, AgentRole, EscalationRecord, IterationOutcome, SessionId, SessionStatus,
};

/// Progress notifier for a running session.
pub trait ProgressNotifier: Send + Sync {
    /// Called once when a session starts or resumes
    fn on_session_start(&self, _id: &SessionId, _task: &str) {}

    /// Called when the coordination state machine changes state
    fn on_state_change(&self, _state: &str) {}

    /// Called when an agent turn starts
    fn on_turn_start(&self, _role: AgentRole, _seq: u64) {}

    /// Called for each event parsed from the agent's output
    fn on_event(&self, _event: &AgentEvent) {}

    /// Called when a turn's iteration has been persisted
    fn on_iteration(&self, _role: AgentRole, _seq: u64, _outcome: &IterationOutcome) {}

    /// Called when the session pauses on an escalation
    fn on_escalation(&self, _record: &EscalationRecord) {}

    /// Called once with the session's final (or paused) status
    fn on_session_end(&self, _status: SessionStatus, _summary: &str) {}
}

/// No-op implementation for tests and quiet mode.
pub struct NoProgress;

impl ProgressNotifier for NoProgress {}
