//! Process supervision for agent turns.
//!
//! [`ProcessSupervisor`] implements the [`AgentRunner`] port by spawning
//! the external agent binary, delivering the directive on stdin, and
//! collecting parsed events until the sentinel structured report, the
//! per-turn deadline, process exit, or cancellation — whichever comes
//! first.
//!
//! Guarantees:
//!
//! - a bounded pool caps concurrent turns across all sessions; waiting
//!   for a slot is itself bounded by a queue timeout
//! - every spawned process is tracked in the [`HandleRegistry`] and its
//!   handle reaches `Terminated` before `run_turn` returns, on every
//!   exit path (cancellation included)
//! - timeouts terminate gracefully first (SIGTERM), then force-kill
//!   after the grace period
//! - a partially decoded report is never promoted to a completion
//!   report: a stream that ends without the sentinel is classified as
//!   `MalformedOutput` (clean exit) or `ProcessCrash` (anything else)
//!
//! With [`ReusePolicy::SessionAffinity`] one warm process is kept per
//! (session, role) and fed line-framed directives; any timeout, crash,
//! or cancellation discards it and the next turn respawns.

use super::command::{AgentProcessConfig, ReusePolicy};
use super::handle::{HandleGuard, HandleRegistry, HandleState};
use super::stream::spawn_event_pump;
use async_trait::async_trait;
use duet_application::ports::agent_runner::{
    AgentRunner, RunnerError, TurnOutcome, TurnRequest, TurnResult,
};
use duet_domain::{AgentEvent, AgentRole, ErrorCategory, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Pool limits for the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Maximum concurrent turns across all sessions
    pub max_concurrent_turns: usize,
    /// How long a turn may wait for a pool slot before failing
    pub queue_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_turns: 4,
            queue_timeout: Duration::from_secs(60),
        }
    }
}

/// A warm process kept alive between turns (session affinity).
struct WarmAgent {
    child: Child,
    stdin: ChildStdin,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    pump: JoinHandle<()>,
    guard: HandleGuard,
}

type WarmKey = (String, AgentRole);

/// Supervises agent processes and runs turns against them.
pub struct ProcessSupervisor {
    process: AgentProcessConfig,
    pool: Arc<Semaphore>,
    queue_timeout: Duration,
    registry: Arc<HandleRegistry>,
    warm: tokio::sync::Mutex<HashMap<WarmKey, WarmAgent>>,
}

impl ProcessSupervisor {
    /// Build a supervisor around an injected handle registry.
    pub fn new(
        process: AgentProcessConfig,
        config: SupervisorConfig,
        registry: Arc<HandleRegistry>,
    ) -> Self {
        Self {
            process,
            pool: Arc::new(Semaphore::new(config.max_concurrent_turns.max(1))),
            queue_timeout: config.queue_timeout,
            registry,
            warm: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Terminate every warm process. Called on shutdown.
    pub async fn shutdown(&self) {
        let mut warm = self.warm.lock().await;
        for (_, agent) in warm.drain() {
            self.dispose_warm(agent).await;
        }
    }

    // ==================== Fresh process per turn ====================

    async fn run_fresh(
        &self,
        request: &TurnRequest,
        started: Instant,
    ) -> Result<TurnOutcome, RunnerError> {
        let guard = self.registry.acquire(request.role);
        let mut child = self
            .process
            .build_command(request.role, false)
            .spawn()
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;
        if let Some(pid) = child.id() {
            guard.set_pid(pid);
        }
        guard.set_state(HandleState::Ready);
        debug!(
            "Spawned {} agent (pid {:?}) for session {}",
            request.role,
            child.id(),
            request.session_id
        );

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Io("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Io("child stdout not captured".to_string()))?;
        let (mut events_rx, pump) = spawn_event_pump(stdout);

        guard.set_state(HandleState::Busy);
        if let Err(e) = stdin.write_all(request.input.as_bytes()).await {
            // The child may have exited before reading its directive;
            // the collect loop observes EOF and classifies the crash.
            warn!("Failed to deliver directive: {}", e);
        }
        let _ = stdin.shutdown().await;
        drop(stdin);

        let mut events = Vec::new();
        let end = collect_events(&mut events_rx, &mut events, request, started).await;

        let outcome = match end {
            CollectEnd::Report(payload) => {
                self.terminate(&mut child, &guard).await;
                Ok(TurnOutcome {
                    events,
                    result: TurnResult::Report(payload),
                    duration: started.elapsed(),
                })
            }
            CollectEnd::Eof => Ok(self.classify_exit(&mut child, &guard, events, started).await),
            CollectEnd::Timeout => {
                self.terminate(&mut child, &guard).await;
                Ok(TurnOutcome::failed(
                    events,
                    ErrorCategory::Timeout,
                    format!("turn timed out after {:?}", request.timeout),
                    started.elapsed(),
                ))
            }
            CollectEnd::Cancelled => {
                info!("Turn cancelled for session {}", request.session_id);
                self.terminate(&mut child, &guard).await;
                Err(RunnerError::Cancelled)
            }
        };

        pump.abort();
        // guard drops here: the handle reaches Terminated and leaves the
        // registry on every path above.
        outcome
    }

    // ==================== Warm process reuse ====================

    async fn run_warm(
        &self,
        request: &TurnRequest,
        started: Instant,
    ) -> Result<TurnOutcome, RunnerError> {
        let key: WarmKey = (request.session_id.to_string(), request.role);
        let existing = self.warm.lock().await.remove(&key);
        let mut agent = match existing {
            Some(agent) => agent,
            None => self.spawn_warm(request.role)?,
        };
        agent.guard.set_state(HandleState::Busy);

        // Serve-mode agents read one JSON-framed directive per line.
        let frame = match serde_json::to_string(&serde_json::json!({ "directive": request.input }))
        {
            Ok(frame) => frame + "\n",
            Err(e) => {
                self.dispose_warm(agent).await;
                return Err(RunnerError::Io(e.to_string()));
            }
        };
        if let Err(e) = agent.stdin.write_all(frame.as_bytes()).await {
            warn!("Warm agent rejected directive: {}", e);
        }
        let _ = agent.stdin.flush().await;

        let mut events = Vec::new();
        let end = collect_events(&mut agent.events, &mut events, request, started).await;
        // The parser numbers events per process lifetime; iterations
        // number them per turn.
        rebase_events(&mut events);

        match end {
            CollectEnd::Report(payload) => {
                agent.guard.set_state(HandleState::Ready);
                self.warm.lock().await.insert(key, agent);
                Ok(TurnOutcome {
                    events,
                    result: TurnResult::Report(payload),
                    duration: started.elapsed(),
                })
            }
            CollectEnd::Eof => {
                let outcome = self
                    .classify_exit(&mut agent.child, &agent.guard, events, started)
                    .await;
                agent.pump.abort();
                Ok(outcome)
            }
            CollectEnd::Timeout => {
                let timeout = request.timeout;
                self.dispose_warm(agent).await;
                Ok(TurnOutcome::failed(
                    events,
                    ErrorCategory::Timeout,
                    format!("turn timed out after {timeout:?}"),
                    started.elapsed(),
                ))
            }
            CollectEnd::Cancelled => {
                info!("Turn cancelled for session {}", request.session_id);
                self.dispose_warm(agent).await;
                Err(RunnerError::Cancelled)
            }
        }
    }

    fn spawn_warm(&self, role: AgentRole) -> Result<WarmAgent, RunnerError> {
        let guard = self.registry.acquire(role);
        let mut child = self
            .process
            .build_command(role, true)
            .spawn()
            .map_err(|e| RunnerError::Spawn(e.to_string()))?;
        if let Some(pid) = child.id() {
            guard.set_pid(pid);
        }
        guard.set_state(HandleState::Ready);

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Io("child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Io("child stdout not captured".to_string()))?;
        let (events, pump) = spawn_event_pump(stdout);

        Ok(WarmAgent {
            child,
            stdin,
            events,
            pump,
            guard,
        })
    }

    async fn dispose_warm(&self, mut agent: WarmAgent) {
        self.terminate(&mut agent.child, &agent.guard).await;
        agent.pump.abort();
        // guard drops with the agent
    }

    // ==================== Termination ====================

    /// Graceful termination: SIGTERM, bounded grace period, SIGKILL.
    async fn terminate(&self, child: &mut Child, guard: &HandleGuard) {
        guard.set_state(HandleState::Terminating);

        if matches!(child.try_wait(), Ok(Some(_))) {
            return; // already exited
        }

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if tokio::time::timeout(self.process.grace_period, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            warn!("Agent pid {} ignored SIGTERM, killing", pid);
        }

        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    /// The stream ended with no report: decide crash vs malformed output
    /// from the exit status.
    async fn classify_exit(
        &self,
        child: &mut Child,
        guard: &HandleGuard,
        events: Vec<AgentEvent>,
        started: Instant,
    ) -> TurnOutcome {
        guard.set_state(HandleState::Terminating);

        let status = match tokio::time::timeout(self.process.grace_period, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Failed to reap agent process: {}", e);
                None
            }
            Err(_) => {
                // Closed stdout but kept running; force it down.
                let _ = child.start_kill();
                let _ = child.wait().await;
                None
            }
        };

        match status {
            Some(status) if status.success() => TurnOutcome::failed(
                events,
                ErrorCategory::MalformedOutput,
                "stream ended without a structured report",
                started.elapsed(),
            ),
            Some(status) => TurnOutcome::failed(
                events,
                ErrorCategory::ProcessCrash,
                format!("agent process exited with {status}"),
                started.elapsed(),
            ),
            None => TurnOutcome::failed(
                events,
                ErrorCategory::ProcessCrash,
                "agent process did not exit cleanly",
                started.elapsed(),
            ),
        }
    }
}

#[async_trait]
impl AgentRunner for ProcessSupervisor {
    async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, RunnerError> {
        // Bounded wait for a pool slot; the permit spans the whole turn.
        let _permit = tokio::time::timeout(self.queue_timeout, Arc::clone(&self.pool).acquire_owned())
            .await
            .map_err(|_| RunnerError::PoolTimeout)?
            .map_err(|e| RunnerError::Io(e.to_string()))?;

        let started = Instant::now();
        match self.process.reuse {
            ReusePolicy::PerTurn => self.run_fresh(&request, started).await,
            ReusePolicy::SessionAffinity => self.run_warm(&request, started).await,
        }
    }

    async fn release_session(&self, session_id: &SessionId) {
        let mut warm = self.warm.lock().await;
        let keys: Vec<WarmKey> = warm
            .keys()
            .filter(|(sid, _)| sid == session_id.as_str())
            .cloned()
            .collect();
        for key in keys {
            if let Some(agent) = warm.remove(&key) {
                debug!("Releasing warm {} agent for session {}", key.1, key.0);
                self.dispose_warm(agent).await;
            }
        }
    }
}

fn rebase_events(events: &mut [AgentEvent]) {
    for (i, event) in events.iter_mut().enumerate() {
        event.seq = i as u64;
    }
}

/// Why event collection stopped.
enum CollectEnd {
    Report(Value),
    Eof,
    Timeout,
    Cancelled,
}

/// Collect events until the sentinel report, EOF, deadline, or
/// cancellation. The clock starts after the pool permit is acquired, so
/// queue time never eats into the turn's budget.
async fn collect_events(
    rx: &mut mpsc::UnboundedReceiver<AgentEvent>,
    events: &mut Vec<AgentEvent>,
    request: &TurnRequest,
    started: Instant,
) -> CollectEnd {
    let deadline = tokio::time::sleep(request.timeout.saturating_sub(started.elapsed()));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = request.cancellation.cancelled() => return CollectEnd::Cancelled,
            _ = &mut deadline => return CollectEnd::Timeout,
            maybe = rx.recv() => match maybe {
                Some(event) => {
                    let payload = event.report_payload().cloned();
                    events.push(event);
                    if let Some(payload) = payload {
                        return CollectEnd::Report(payload);
                    }
                }
                None => return CollectEnd::Eof,
            }
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use duet_domain::EventKind;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    fn write_stub(dir: &Path, name: &str, script: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{script}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn supervisor_for(binary: String) -> ProcessSupervisor {
        supervisor_with(binary, ReusePolicy::PerTurn, SupervisorConfig::default())
    }

    fn supervisor_with(
        binary: String,
        reuse: ReusePolicy,
        config: SupervisorConfig,
    ) -> ProcessSupervisor {
        let process = AgentProcessConfig {
            binary,
            reuse,
            grace_period: Duration::from_millis(200),
            ..Default::default()
        };
        ProcessSupervisor::new(process, config, HandleRegistry::new())
    }

    fn request(timeout_ms: u64) -> TurnRequest {
        TurnRequest {
            session_id: SessionId::from("s-test"),
            role: AgentRole::Executor,
            input: "do the thing\n".to_string(),
            timeout: Duration::from_millis(timeout_ms),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn successful_turn_returns_report_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_stub(
            dir.path(),
            "agent",
            r#"cat > /dev/null
printf '%s\n' '{"type":"text","text":"working"}'
printf '%s\n' '{"type":"report","status":"success","summary":"done"}'
"#,
        );
        let supervisor = supervisor_for(binary);

        let outcome = supervisor.run_turn(request(5_000)).await.unwrap();
        match outcome.result {
            TurnResult::Report(payload) => assert_eq!(payload["status"], "success"),
            other => panic!("expected report, got {other:?}"),
        }
        assert_eq!(outcome.events.len(), 2);
        assert_eq!(outcome.events[0].seq, 0);
        assert!(outcome.events[1].is_report());
        assert_eq!(supervisor.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn timeout_is_classified_and_process_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_stub(
            dir.path(),
            "agent",
            r#"cat > /dev/null
printf '%s\n' '{"type":"text","text":"stalling"}'
sleep 60
"#,
        );
        let supervisor = supervisor_for(binary);

        let outcome = supervisor.run_turn(request(300)).await.unwrap();
        match outcome.result {
            TurnResult::Failed { category, .. } => {
                assert_eq!(category, ErrorCategory::Timeout);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // Partial events survive the timeout.
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(supervisor.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_process_crash() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_stub(
            dir.path(),
            "agent",
            r#"cat > /dev/null
printf '%s\n' '{"type":"text","text":"about to die"}'
exit 3
"#,
        );
        let supervisor = supervisor_for(binary);

        let outcome = supervisor.run_turn(request(5_000)).await.unwrap();
        match outcome.result {
            TurnResult::Failed { category, message } => {
                assert_eq!(category, ErrorCategory::ProcessCrash);
                assert!(message.contains("3"), "message was: {message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(supervisor.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn clean_exit_without_report_is_malformed_output() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_stub(
            dir.path(),
            "agent",
            r#"cat > /dev/null
printf '%s\n' '{"type":"text","text":"forgot the report"}'
exit 0
"#,
        );
        let supervisor = supervisor_for(binary);

        let outcome = supervisor.run_turn(request(5_000)).await.unwrap();
        match outcome.result {
            TurnResult::Failed { category, .. } => {
                assert_eq!(category, ErrorCategory::MalformedOutput);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(supervisor.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_terminates_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_stub(dir.path(), "agent", "cat > /dev/null\nsleep 60\n");
        let supervisor = supervisor_for(binary);

        let token = CancellationToken::new();
        let mut req = request(30_000);
        req.cancellation = token.clone();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let err = supervisor.run_turn(req).await.unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert_eq!(supervisor.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn pool_bound_queues_and_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let binary = write_stub(dir.path(), "agent", "cat > /dev/null\nsleep 60\n");
        let supervisor = Arc::new(supervisor_with(
            binary,
            ReusePolicy::PerTurn,
            SupervisorConfig {
                max_concurrent_turns: 1,
                queue_timeout: Duration::from_millis(200),
            },
        ));

        let first = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.run_turn(request(2_000)).await })
        };
        // Give the first turn time to take the only slot.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = supervisor.run_turn(request(2_000)).await.unwrap_err();
        assert!(matches!(err, RunnerError::PoolTimeout));

        let first = first.await.unwrap().unwrap();
        assert!(matches!(first.result, TurnResult::Failed { .. }));
        assert_eq!(supervisor.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let supervisor = supervisor_for("/nonexistent/duet-agent".to_string());
        let err = supervisor.run_turn(request(1_000)).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn(_)));
        assert_eq!(supervisor.registry().active_count(), 0);
    }

    #[tokio::test]
    async fn session_affinity_reuses_one_process() {
        let dir = tempfile::tempdir().unwrap();
        // Serve-mode stub: one report per directive line.
        let binary = write_stub(
            dir.path(),
            "agent",
            r#"while read -r line; do
  printf '%s\n' '{"type":"text","text":"turn"}'
  printf '%s\n' '{"type":"report","status":"success","summary":"turn"}'
done
"#,
        );
        let supervisor = supervisor_with(
            binary,
            ReusePolicy::SessionAffinity,
            SupervisorConfig::default(),
        );

        let first = supervisor.run_turn(request(5_000)).await.unwrap();
        assert!(matches!(first.result, TurnResult::Report(_)));
        // The warm process stays registered between turns.
        assert_eq!(supervisor.registry().active_count(), 1);

        let second = supervisor.run_turn(request(5_000)).await.unwrap();
        assert!(matches!(second.result, TurnResult::Report(_)));
        // Event sequence numbers are re-based per turn.
        assert_eq!(second.events[0].seq, 0);
        assert_eq!(
            second.events[0].kind,
            EventKind::TextChunk {
                text: "turn".to_string()
            }
        );

        supervisor.release_session(&SessionId::from("s-test")).await;
        assert_eq!(supervisor.registry().active_count(), 0);
    }
}
