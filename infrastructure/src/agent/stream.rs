//! Stream parsing for agent process output.
//!
//! Agent binaries write newline-delimited records to stdout, but the
//! bytes arrive however the pipe delivers them: chunks split mid-line,
//! mid-UTF-8 sequence, or mid-JSON token, interleaved with terminal
//! escape sequences from tools the agent ran. [`StreamParser`] turns
//! that raw byte stream into typed [`AgentEvent`]s:
//!
//! - an incomplete trailing line is buffered across chunks
//! - known terminal control sequences are stripped before decoding
//! - a line that fails JSON decoding becomes a `TextChunk`, never an
//!   abort — one malformed line must not poison the rest of the stream
//! - `finish()` flushes a buffered partial line at end of input
//! - sequence numbers are assigned in the order bytes were observed
//!
//! [`spawn_event_pump`] couples a parser to a child stdout and forwards
//! events over a channel, so the supervisor can `select!` between "next
//! event" and "deadline".

use duet_domain::{AgentEvent, EventKind};
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Incremental parser from raw bytes to [`AgentEvent`]s.
#[derive(Debug, Default)]
pub struct StreamParser {
    /// Carry-over bytes of an incomplete trailing line
    buf: Vec<u8>,
    next_seq: u64,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning an event per completed line.
    ///
    /// Chunk boundaries are arbitrary; the same logical content produces
    /// the same events no matter how it is split.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<AgentEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = self.parse_line(&line[..line.len() - 1]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush the trailing partial line at end of input (best-effort
    /// decode).
    pub fn finish(&mut self) -> Option<AgentEvent> {
        if self.buf.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buf);
        self.parse_line(&line)
    }

    fn parse_line(&mut self, raw: &[u8]) -> Option<AgentEvent> {
        let text = String::from_utf8_lossy(raw);
        let cleaned = strip_control_sequences(&text);
        let line = cleaned.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }

        let kind = classify_line(line);
        let seq = self.next_seq;
        self.next_seq += 1;
        trace!("Stream event #{}: {}", seq, kind.as_str());
        Some(AgentEvent::new(seq, kind))
    }
}

/// Decode one cleaned line into an event kind.
///
/// Recognized wire shapes (a `type` tag on a JSON object):
/// `report`, `text`, `tool_use` / `tool_call`, `file_change`, `error`.
/// Anything else — unrecognized JSON, arrays, plain prose — is a text
/// chunk.
fn classify_line(line: &str) -> EventKind {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return EventKind::TextChunk {
            text: line.to_string(),
        };
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("report") => EventKind::StructuredReport { payload: value },
        Some("text") => EventKind::TextChunk {
            text: value
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or(line)
                .to_string(),
        },
        Some("tool_use") | Some("tool_call") => {
            let tool = value
                .get("name")
                .or_else(|| value.get("tool"))
                .and_then(|t| t.as_str());
            match tool {
                Some(tool) => EventKind::ToolInvocation {
                    tool: tool.to_string(),
                    args: value
                        .get("input")
                        .or_else(|| value.get("args"))
                        .cloned()
                        .unwrap_or(Value::Null),
                },
                None => EventKind::TextChunk {
                    text: line.to_string(),
                },
            }
        }
        Some("file_change") => match value.get("path").and_then(|p| p.as_str()) {
            Some(path) => EventKind::FileChange {
                path: path.to_string(),
                action: value
                    .get("action")
                    .and_then(|a| a.as_str())
                    .unwrap_or("modified")
                    .to_string(),
            },
            None => EventKind::TextChunk {
                text: line.to_string(),
            },
        },
        Some("error") => EventKind::Error {
            message: value
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or(line)
                .to_string(),
        },
        _ => EventKind::TextChunk {
            text: line.to_string(),
        },
    }
}

/// Strip ANSI CSI / OSC sequences and bare escapes from a line.
///
/// Tools spawned by the agent (compilers, test runners) often color
/// their output; the sequences are noise for structured decoding.
fn strip_control_sequences(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            // CSI: ESC [ ... final byte in 0x40..=0x7e
            Some('[') => {
                chars.next();
                for n in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&n) {
                        break;
                    }
                }
            }
            // OSC: ESC ] ... terminated by BEL or ESC \
            Some(']') => {
                chars.next();
                while let Some(n) = chars.next() {
                    if n == '\u{07}' {
                        break;
                    }
                    if n == '\u{1b}' {
                        if chars.peek() == Some(&'\\') {
                            chars.next();
                        }
                        break;
                    }
                }
            }
            // Two-character escape (ESC c, ESC M, ...)
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

/// Pump a child's stdout through a parser into a channel.
///
/// The receiver sees events in arrival order; the channel closes when
/// the stream ends (after the trailing partial line is flushed).
pub(crate) fn spawn_event_pump(
    mut stdout: ChildStdout,
) -> (mpsc::UnboundedReceiver<AgentEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut parser = StreamParser::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for event in parser.feed(&chunk[..n]) {
                        if tx.send(event).is_err() {
                            return; // receiver gone, stop reading
                        }
                    }
                }
                Err(e) => {
                    warn!("Event pump: read error: {}", e);
                    break;
                }
            }
        }
        if let Some(event) = parser.finish() {
            let _ = tx.send(event);
        }
    });
    (rx, handle)
}
