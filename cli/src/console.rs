//! Console progress reporting and session rendering.

use duet_application::ProgressNotifier;
use duet_domain::{
    AgentEvent, AgentRole, EscalationRecord, EventKind, IterationOutcome, Session, SessionId,
    SessionStatus, truncate,
};

/// Prints coordination progress as plain lines.
pub struct ConsoleProgress;

impl ConsoleProgress {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier for ConsoleProgress {
    fn on_session_start(&self, id: &SessionId, task: &str) {
        println!("Session {id}");
        println!("Task: {}", truncate(task, 100));
        println!();
    }

    fn on_state_change(&self, state: &str) {
        println!("-> {state}");
    }

    fn on_turn_start(&self, role: AgentRole, seq: u64) {
        println!("[{role}] turn {seq} running...");
    }

    fn on_event(&self, event: &AgentEvent) {
        match &event.kind {
            EventKind::ToolInvocation { tool, .. } => println!("    tool: {tool}"),
            EventKind::FileChange { path, action } => println!("    file: {path} ({action})"),
            EventKind::Error { message } => println!("    error: {}", truncate(message, 100)),
            // Text chunks and report payloads stay in the transcript.
            EventKind::TextChunk { .. } | EventKind::StructuredReport { .. } => {}
        }
    }

    fn on_iteration(&self, role: AgentRole, seq: u64, outcome: &IterationOutcome) {
        println!("[{role}] turn {seq} -> {}", outcome.as_str());
    }

    fn on_escalation(&self, record: &EscalationRecord) {
        println!();
        println!("ESCALATION ({} / {})", record.category, record.severity);
        println!("  {}", record.description);
        println!("  after {} iterations", record.attempted_iterations);
        println!("  recommended: {}", record.recommended_action);
    }

    fn on_session_end(&self, status: SessionStatus, summary: &str) {
        println!();
        println!("Session {status}: {summary}");
    }
}

/// Render a persisted session for `duet show`.
pub fn render_session(session: &Session) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session {}\n", session.id));
    out.push_str(&format!("Status:  {}\n", session.status));
    out.push_str(&format!("Task:    {}\n", session.task));
    if let Some(dir) = &session.working_dir {
        out.push_str(&format!("Workdir: {dir}\n"));
    }
    out.push_str(&format!(
        "Created: {}\nUpdated: {}\n",
        session.created_at.to_rfc3339(),
        session.updated_at.to_rfc3339()
    ));

    out.push_str(&format!("\nIterations ({}):\n", session.iterations.len()));
    for iteration in &session.iterations {
        out.push_str(&format!(
            "  {} ({} events, {} ms)\n",
            iteration.digest(),
            iteration.events.len(),
            iteration.duration_ms
        ));
    }

    if let Some(record) = &session.escalation {
        out.push_str(&format!(
            "\nEscalation: {} / {}\n  {}\n  recommended: {}\n",
            record.category, record.severity, record.description, record.recommended_action
        ));
    }
    out
}
