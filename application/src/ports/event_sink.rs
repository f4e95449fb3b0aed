//! Event sink port
//!
//! The core emits a flat stream of event records to an external collector
//! (the monitoring dashboard's ingestion endpoint). Delivery is
//! fire-and-forget: `emit` is synchronous, infallible, and must never
//! block the turn that produced the event. Implementations that do real
//! I/O hand the record off to a background task.

use chrono::{DateTime, Utc};
use duet_domain::{AgentEvent, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One flat record for the external collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub iteration_seq: u64,
    pub event_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// Flatten a parsed agent event for delivery.
    pub fn from_event(session_id: &SessionId, iteration_seq: u64, event: &AgentEvent) -> Self {
        Self {
            session_id: session_id.to_string(),
            iteration_seq,
            event_type: event.kind.as_str().to_string(),
            payload: serde_json::to_value(event).unwrap_or(Value::Null),
            timestamp: Utc::now(),
        }
    }
}

/// Port for forwarding events to an external collector.
///
/// Failure to deliver must never surface to the caller; implementations
/// log and drop.
pub trait EventSink: Send + Sync {
    fn emit(&self, record: EventRecord);
}

/// No-op implementation for tests and when no collector is configured.
pub struct NoEventSink;

impl EventSink for NoEventSink {
    fn emit(&self, _record: EventRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_domain::EventKind;

    #[test]
    fn record_flattens_event() {
        let id = SessionId::from("s-1");
        let event = AgentEvent::new(
            2,
            EventKind::TextChunk {
                text: "hi".to_string(),
            },
        );
        let record = EventRecord::from_event(&id, 5, &event);
        assert_eq!(record.session_id, "s-1");
        assert_eq!(record.iteration_seq, 5);
        assert_eq!(record.event_type, "text_chunk");
        assert_eq!(record.payload["seq"], 2);
    }
}
