//! JSONL session store.
//!
//! One append-only file per session under the sessions directory:
//! a header record followed by one record per iteration, each a single
//! JSON line flushed on write for crash safety. Status changes append a
//! fresh header record; the last header wins on load. External viewers
//! read the same format read-only.
//!
//! Loads verify the iteration sequence is contiguous from 0. A gap or an
//! unparseable record raises [`StoreError::Corruption`] carrying the
//! count of leading intact iterations, which `rollback` uses to truncate
//! the file back to a consistent point (atomic rewrite via temp file +
//! rename). Rollback never fabricates data.

use async_trait::async_trait;
use duet_application::ports::session_store::{Corruption, SessionStore, StoreError};
use duet_domain::{
    EscalationRecord, Iteration, Session, SessionId, SessionStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Header fields persisted for a session (everything but the
/// iterations).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeaderRecord {
    id: SessionId,
    task: String,
    working_dir: Option<String>,
    status: SessionStatus,
    escalation: Option<EscalationRecord>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl HeaderRecord {
    fn of(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            task: session.task.clone(),
            working_dir: session.working_dir.clone(),
            status: session.status,
            escalation: session.escalation.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }

    fn into_session(self, iterations: Vec<Iteration>) -> Session {
        Session {
            id: self.id,
            task: self.task,
            working_dir: self.working_dir,
            status: self.status,
            escalation: self.escalation,
            created_at: self.created_at,
            updated_at: self.updated_at,
            iterations,
        }
    }
}

/// One line in a session file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum StoreRecord {
    Header(HeaderRecord),
    Iteration(Iteration),
}

/// File-per-session JSONL store.
pub struct JsonlSessionStore {
    dir: PathBuf,
}

impl JsonlSessionStore {
    /// Open (and create if needed) the sessions directory.
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.dir.join(format!("{id}.jsonl"))
    }

    fn append_record(&self, path: &Path, record: &StoreRecord) -> Result<(), StoreError> {
        let file = OpenOptions::new().append(true).open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.display().to_string())
            } else {
                StoreError::Io(e)
            }
        })?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", serde_json::to_string(record)?)?;
        // Flush per record — the file is the crash-recovery source.
        writer.flush()?;
        Ok(())
    }

    /// Parse a session file.
    ///
    /// `lenient` stops at the first bad record instead of failing; the
    /// rollback path uses it to recover the intact prefix.
    fn read_session(&self, id: &SessionId, lenient: bool) -> Result<Session, StoreError> {
        let path = self.path_for(id);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(id.to_string())
            } else {
                StoreError::Io(e)
            }
        })?;

        let mut header: Option<HeaderRecord> = None;
        let mut iterations: Vec<Iteration> = Vec::new();

        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoreRecord>(line) {
                Ok(StoreRecord::Header(h)) => header = Some(h),
                Ok(StoreRecord::Iteration(iteration)) => {
                    let expected = iterations.len() as u64;
                    if iteration.seq != expected {
                        if lenient {
                            break;
                        }
                        return Err(StoreError::Corruption {
                            kind: Corruption::SequenceGap {
                                expected,
                                found: iteration.seq,
                            },
                            intact: expected,
                        });
                    }
                    iterations.push(iteration);
                }
                Err(e) => {
                    // A torn trailing line from a crash mid-append, or
                    // mid-file damage; either way the prefix up to here
                    // is the recoverable state.
                    if lenient {
                        break;
                    }
                    warn!("Session {}: unparseable record: {}", id, e);
                    return Err(StoreError::Corruption {
                        kind: Corruption::TornWrite,
                        intact: iterations.len() as u64,
                    });
                }
            }
        }

        match header {
            Some(header) => Ok(header.into_session(iterations)),
            None => Err(StoreError::Corruption {
                kind: Corruption::MissingHeader,
                intact: 0,
            }),
        }
    }
}

#[async_trait]
impl SessionStore for JsonlSessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let path = self.path_for(&session.id);
        let file = File::create_new(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::Io(std::io::Error::other(format!(
                    "session {} already exists",
                    session.id
                )))
            } else {
                StoreError::Io(e)
            }
        })?;
        let mut writer = BufWriter::new(file);
        let record = StoreRecord::Header(HeaderRecord::of(session));
        writeln!(writer, "{}", serde_json::to_string(&record)?)?;
        writer.flush()?;
        debug!("Created session file {}", path.display());
        Ok(())
    }

    async fn append(&self, id: &SessionId, iteration: &Iteration) -> Result<(), StoreError> {
        self.append_record(
            &self.path_for(id),
            &StoreRecord::Iteration(iteration.clone()),
        )
    }

    async fn update_header(&self, session: &Session) -> Result<(), StoreError> {
        self.append_record(
            &self.path_for(&session.id),
            &StoreRecord::Header(HeaderRecord::of(session)),
        )
    }

    async fn load(&self, id: &SessionId) -> Result<Session, StoreError> {
        self.read_session(id, false)
    }

    async fn rollback(&self, id: &SessionId, keep: u64) -> Result<Session, StoreError> {
        let mut session = self.read_session(id, true)?;
        session.iterations.truncate(keep as usize);
        warn!(
            "Rolling back session {} to {} iterations",
            id,
            session.iterations.len()
        );

        // Atomic rewrite: temp file in the same directory, then rename.
        let path = self.path_for(id);
        let tmp = self.dir.join(format!("{id}.jsonl.tmp"));
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            let header = StoreRecord::Header(HeaderRecord::of(&session));
            writeln!(writer, "{}", serde_json::to_string(&header)?)?;
            for iteration in &session.iterations {
                let record = StoreRecord::Iteration(iteration.clone());
                writeln!(writer, "{}", serde_json::to_string(&record)?)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &path)?;

        self.read_session(id, false)
    }

    async fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(SessionId::from(stem));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}
