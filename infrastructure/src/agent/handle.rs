//! Process handle registry.
//!
//! Every spawned agent process is tracked as a [`ProcessHandle`] in an
//! id-indexed table owned by the supervisor. Handles are acquired through
//! a scoped [`HandleGuard`]: dropping the guard — on success, timeout,
//! crash, or cancellation alike — marks the handle `Terminated` and
//! removes it from the table, so no exit path can leak a handle.

use chrono::{DateTime, Utc};
use duet_domain::AgentRole;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub type HandleId = u64;

/// Lifecycle state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Spawning,
    Ready,
    Busy,
    Terminating,
    Terminated,
}

/// Bookkeeping entry for one spawned process.
///
/// Exclusively owned by the supervisor; never handed to other
/// components.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub id: HandleId,
    pub pid: Option<u32>,
    pub role: AgentRole,
    pub spawned_at: DateTime<Utc>,
    pub state: HandleState,
}

/// Id-indexed table of live process handles.
///
/// Injected into the supervisor rather than living in a process-wide
/// global, so tests can assert on its contents.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    inner: Mutex<HashMap<HandleId, ProcessHandle>>,
    next_id: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new handle in `Spawning` state and return its guard.
    pub fn acquire(self: &Arc<Self>, role: AgentRole) -> HandleGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = ProcessHandle {
            id,
            pid: None,
            role,
            spawned_at: Utc::now(),
            state: HandleState::Spawning,
        };
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, handle);
        HandleGuard {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Number of handles not yet terminated.
    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Snapshot of a handle, if still live.
    pub fn get(&self, id: HandleId) -> Option<ProcessHandle> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    fn update<F: FnOnce(&mut ProcessHandle)>(&self, id: HandleId, f: F) {
        if let Some(handle) = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&id)
        {
            f(handle);
        }
    }

    fn release(&self, id: HandleId) {
        let removed = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(handle) = removed {
            debug!(
                "Handle {} ({} pid={:?}) terminated",
                id, handle.role, handle.pid
            );
        }
    }
}

/// Scoped ownership of one registry entry.
///
/// The handle reaches `Terminated` exactly once: either through an
/// explicit state walk ending in drop, or through drop alone on an
/// early-exit path.
#[derive(Debug)]
pub struct HandleGuard {
    registry: Arc<HandleRegistry>,
    id: HandleId,
}

impl HandleGuard {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn set_pid(&self, pid: u32) {
        self.registry.update(self.id, |h| h.pid = Some(pid));
    }

    pub fn set_state(&self, state: HandleState) {
        self.registry.update(self.id, |h| h.state = state);
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        // Terminated-then-removed, on every exit path.
        self.registry.update(self.id, |h| h.state = HandleState::Terminated);
        self.registry.release(self.id);
    }
}
