//! Session store port
//!
//! Durable, append-only persistence of session history. Appending an
//! iteration is the only mutation of history; header updates record
//! status changes. Loads must return contiguous, gapless iteration
//! sequences — a gap is corruption, surfaced as an error, never as a
//! partially filled session.

use async_trait::async_trait;
use duet_domain::{Iteration, Session, SessionId};
use thiserror::Error;

/// What kind of inconsistency a load detected.
#[derive(Error, Debug)]
pub enum Corruption {
    #[error("iteration sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("torn record at end of session file")]
    TornWrite,

    #[error("session file has no header record")]
    MissingHeader,
}

/// Errors from session store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt session history ({intact} intact iterations): {kind}")]
    Corruption {
        kind: Corruption,
        /// Leading iterations that are still intact and safe to keep
        intact: u64,
    },
}

impl StoreError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corruption { .. })
    }
}

/// Port for durable session persistence.
///
/// Within one session id all writes are serialized by the single-writer
/// state machine; implementations need no cross-session locking because
/// sessions persist to disjoint histories.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session header. Fails if the id already exists.
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    /// Append one iteration to the session's history.
    async fn append(&self, id: &SessionId, iteration: &Iteration) -> Result<(), StoreError>;

    /// Record a header change (status, escalation, timestamps).
    async fn update_header(&self, session: &Session) -> Result<(), StoreError>;

    /// Load a session with its full iteration history.
    ///
    /// Returns [`StoreError::Corruption`] when the history is gapped or
    /// torn rather than silently returning partial data.
    async fn load(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Truncate history so that only iterations with `seq < keep` remain.
    ///
    /// Used only by the recovery path after detected corruption; never
    /// fabricates data. Returns the reloaded session.
    async fn rollback(&self, id: &SessionId, keep: u64) -> Result<Session, StoreError>;

    /// Ids of all persisted sessions.
    async fn list(&self) -> Result<Vec<SessionId>, StoreError>;
}
