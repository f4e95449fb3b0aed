//! Typed events parsed from an agent's output stream.
//!
//! The stream parser turns raw agent output into a sequence of
//! [`AgentEvent`]s. Events are totally ordered within an iteration by
//! their sequence number, assigned in the order the bytes were observed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a single parsed event carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// Free-form text: plain output lines, or JSON the wire format
    /// doesn't recognize.
    TextChunk { text: String },
    /// The agent invoked an external tool.
    ToolInvocation {
        tool: String,
        #[serde(default)]
        args: Value,
    },
    /// The agent touched a file in the working directory.
    FileChange { path: String, action: String },
    /// The agent reported an error mid-stream.
    Error { message: String },
    /// The sentinel report that ends a turn. Carries the full payload;
    /// interpreting it is the report parser's job.
    StructuredReport { payload: Value },
}

impl EventKind {
    /// Short type tag used for sink records and transcripts.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::TextChunk { .. } => "text_chunk",
            EventKind::ToolInvocation { .. } => "tool_invocation",
            EventKind::FileChange { .. } => "file_change",
            EventKind::Error { .. } => "error",
            EventKind::StructuredReport { .. } => "structured_report",
        }
    }
}

/// One event within an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Position in the iteration's event sequence, starting at 0.
    pub seq: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl AgentEvent {
    pub fn new(seq: u64, kind: EventKind) -> Self {
        Self { seq, kind }
    }

    /// Whether this event is the turn-ending structured report.
    pub fn is_report(&self) -> bool {
        matches!(self.kind, EventKind::StructuredReport { .. })
    }

    /// The report payload, if this is a structured report.
    pub fn report_payload(&self) -> Option<&Value> {
        match &self.kind {
            EventKind::StructuredReport { payload } => Some(payload),
            _ => None,
        }
    }
}
