//! HTTP event sink.
//!
//! Posts each event record to the monitoring collector's ingestion
//! endpoint. Delivery is fire-and-forget: `emit` hands the record to a
//! detached task and returns immediately; failures are logged at debug
//! and dropped. The collector being down must never slow down or fail a
//! turn.

use duet_application::ports::event_sink::{EventRecord, EventSink};
use std::time::Duration;
use tracing::debug;

/// Fire-and-forget sink posting records to a collector endpoint.
pub struct HttpEventSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl EventSink for HttpEventSink {
    fn emit(&self, record: EventRecord) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        // Detached: the turn never waits on the collector.
        tokio::spawn(async move {
            match client.post(&endpoint).json(&record).send().await {
                Ok(response) if !response.status().is_success() => {
                    debug!(
                        "Event sink: collector answered {} for {}",
                        response.status(),
                        record.event_type
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Event sink: delivery failed: {}", e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn emit_never_blocks_or_panics_without_a_collector() {
        let sink = HttpEventSink::new("http://127.0.0.1:1/ingest");
        sink.emit(EventRecord {
            session_id: "s".to_string(),
            iteration_seq: 0,
            event_type: "text_chunk".to_string(),
            payload: serde_json::json!({"text": "hi"}),
            timestamp: Utc::now(),
        });
        // Give the detached task a moment; the point is that nothing
        // propagates back.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
