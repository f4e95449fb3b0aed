//! State machine tests with a scripted runner and an in-memory store.

use super::*;
use crate::ports::agent_runner::{RunnerError, TurnOutcome};
use crate::ports::session_store::Corruption;
use async_trait::async_trait;
use duet_domain::EventKind;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

// ==================== Scripted runner ====================

struct FakeRunner {
    script: Mutex<VecDeque<Result<TurnOutcome, RunnerError>>>,
}

impl FakeRunner {
    fn new(turns: Vec<Result<TurnOutcome, RunnerError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(turns.into()),
        })
    }

    fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRunner for FakeRunner {
    async fn run_turn(&self, _request: TurnRequest) -> Result<TurnOutcome, RunnerError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("runner script exhausted: the state machine ran an unexpected turn")
    }
}

fn report_outcome(payload: Value) -> Result<TurnOutcome, RunnerError> {
    Ok(TurnOutcome {
        events: vec![
            AgentEvent::new(
                0,
                EventKind::TextChunk {
                    text: "thinking".to_string(),
                },
            ),
            AgentEvent::new(
                1,
                EventKind::StructuredReport {
                    payload: payload.clone(),
                },
            ),
        ],
        result: TurnResult::Report(payload),
        duration: Duration::from_millis(5),
    })
}

fn planner_directive(directive: &str, items: Value) -> Result<TurnOutcome, RunnerError> {
    report_outcome(json!({
        "type": "report",
        "role": "planner",
        "decision": "directive",
        "directive": directive,
        "work_items": items,
    }))
}

fn planner_complete(summary: &str) -> Result<TurnOutcome, RunnerError> {
    report_outcome(json!({
        "type": "report",
        "role": "planner",
        "decision": "complete",
        "summary": summary,
    }))
}

fn executor_success(gates: Value, completed: Value) -> Result<TurnOutcome, RunnerError> {
    report_outcome(json!({
        "type": "report",
        "role": "executor",
        "status": "success",
        "summary": "done",
        "gates": gates,
        "completed_items": completed,
    }))
}

fn executor_reported_error(category: &str, message: &str) -> Result<TurnOutcome, RunnerError> {
    report_outcome(json!({
        "type": "report",
        "role": "executor",
        "status": "error",
        "summary": message,
        "error": {"category": category, "message": message},
    }))
}

fn turn_failed(category: ErrorCategory, message: &str) -> Result<TurnOutcome, RunnerError> {
    Ok(TurnOutcome::failed(
        vec![AgentEvent::new(
            0,
            EventKind::TextChunk {
                text: "partial output".to_string(),
            },
        )],
        category,
        message,
        Duration::from_millis(5),
    ))
}

// ==================== In-memory store ====================

#[derive(Default)]
struct InMemoryStore {
    sessions: Mutex<HashMap<String, Session>>,
    /// When set, the next load reports a sequence gap with this many
    /// intact iterations.
    corrupt_next_load: Mutex<Option<u64>>,
}

impl InMemoryStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn seed(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.to_string(), session);
    }

    fn corrupt_next_load(&self, intact: u64) {
        *self.corrupt_next_load.lock().unwrap() = Some(intact);
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.to_string(), session.clone());
        Ok(())
    }

    async fn append(&self, id: &SessionId, iteration: &Iteration) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        session.push_iteration(iteration.clone());
        Ok(())
    }

    async fn update_header(&self, updated: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(updated.id.as_str())
            .ok_or_else(|| StoreError::NotFound(updated.id.to_string()))?;
        session.status = updated.status;
        session.escalation = updated.escalation.clone();
        session.updated_at = updated.updated_at;
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Session, StoreError> {
        if let Some(intact) = self.corrupt_next_load.lock().unwrap().take() {
            return Err(StoreError::Corruption {
                kind: Corruption::SequenceGap {
                    expected: intact,
                    found: intact + 1,
                },
                intact,
            });
        }
        self.sessions
            .lock()
            .unwrap()
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn rollback(&self, id: &SessionId, keep: u64) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id.as_str())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        session.iterations.truncate(keep as usize);
        Ok(session.clone())
    }

    async fn list(&self) -> Result<Vec<SessionId>, StoreError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .keys()
            .map(|k| SessionId::from(k.clone()))
            .collect())
    }
}

// ==================== Collecting sink ====================

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<EventRecord>>,
}

impl EventSink for CollectingSink {
    fn emit(&self, record: EventRecord) {
        self.records.lock().unwrap().push(record);
    }
}

fn params() -> ExecutionParams {
    ExecutionParams::default().with_turn_timeout(Duration::from_secs(5))
}

// ==================== Scenarios ====================

#[tokio::test]
async fn scenario_a_two_iterations_to_completion() {
    let runner = FakeRunner::new(vec![
        planner_directive(
            "Add the retry flag",
            json!([{"id": "w1", "title": "Add --retry flag"}]),
        ),
        executor_success(
            json!([{"gate": "tests", "passed": true, "evidence": "12 passed"}]),
            json!(["w1"]),
        ),
    ]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner.clone(), store.clone());

    let output = use_case
        .execute(RunSessionInput::new("Add a retry flag", params()))
        .await
        .unwrap();

    assert!(output.completed());
    assert_eq!(output.session.iterations.len(), 2);
    assert_eq!(output.session.iterations[0].role, AgentRole::Planner);
    assert_eq!(
        output.session.iterations[1].outcome,
        IterationOutcome::Complete
    );
    assert_eq!(runner.remaining(), 0);

    // The persisted copy matches what came back.
    let stored = store.load(&output.session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Completed);
    assert_eq!(stored.iterations.len(), 2);
}

#[tokio::test]
async fn scenario_b_two_timeouts_then_success() {
    let runner = FakeRunner::new(vec![
        planner_directive("Fix the build", json!([{"id": "w1", "title": "Fix the build"}])),
        turn_failed(ErrorCategory::Timeout, "turn timed out after 300s"),
        turn_failed(ErrorCategory::Timeout, "turn timed out after 300s"),
        executor_success(json!([{"gate": "build", "passed": true}]), json!([])),
        planner_complete("Build fixed"),
    ]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner.clone(), store);

    let output = use_case
        .execute(RunSessionInput::new("Fix the build", params()))
        .await
        .unwrap();

    assert!(output.completed());
    assert_eq!(output.session.iterations.len(), 5);
    let errors = output
        .session
        .iterations
        .iter()
        .filter(|it| it.outcome.is_error())
        .count();
    assert_eq!(errors, 2);
    assert_eq!(output.summary, "Build fixed");
}

#[tokio::test]
async fn scenario_c_critical_error_escalates_without_retry() {
    let runner = FakeRunner::new(vec![
        planner_directive("Touch the config", json!([])),
        executor_reported_error("security", "attempted write outside working dir"),
    ]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner.clone(), store);

    let output = use_case
        .execute(RunSessionInput::new("Touch the config", params()))
        .await
        .unwrap();

    assert_eq!(output.session.status, SessionStatus::Paused);
    let record = output.session.escalation.as_ref().unwrap();
    assert_eq!(record.severity, Severity::Critical);
    assert_eq!(record.category, ErrorCategory::Security);
    assert_eq!(output.session.iterations.len(), 2);
    assert_eq!(
        output.session.iterations[1].outcome,
        IterationOutcome::Escalate
    );
    // No retry turn was consumed.
    assert_eq!(runner.remaining(), 0);
}

#[tokio::test]
async fn loop_bound_three_identical_signatures() {
    let runner = FakeRunner::new(vec![
        planner_directive("Run the migration", json!([])),
        turn_failed(ErrorCategory::Timeout, "migration hung"),
        turn_failed(ErrorCategory::Timeout, "migration hung"),
        turn_failed(ErrorCategory::Timeout, "migration hung"),
        // A 4th identical-signature turn would panic the script check.
    ]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner.clone(), store);

    let output = use_case
        .execute(RunSessionInput::new("Run the migration", params()))
        .await
        .unwrap();

    assert_eq!(output.session.status, SessionStatus::Paused);
    assert!(output.session.escalation.is_some());
    // planner + 2 retried errors + 1 escalation
    assert_eq!(output.session.iterations.len(), 4);
    assert_eq!(runner.remaining(), 0);
}

#[tokio::test]
async fn iteration_budget_forces_escalation() {
    let runner = FakeRunner::new(vec![
        planner_directive("Step 1", json!([{"id": "w1", "title": "endless"}])),
        // Executor succeeds but never closes w1, so the loop keeps going.
        executor_success(json!([]), json!([])),
    ]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner.clone(), store);

    let output = use_case
        .execute(RunSessionInput::new(
            "Endless task",
            params().with_max_iterations(2),
        ))
        .await
        .unwrap();

    assert_eq!(output.session.status, SessionStatus::Paused);
    let record = output.session.escalation.as_ref().unwrap();
    assert!(record.description.contains("budget"));
    assert_eq!(output.session.iterations.len(), 2);
}

#[tokio::test]
async fn blocking_gate_failure_goes_back_to_planning() {
    let runner = FakeRunner::new(vec![
        planner_directive("Implement", json!([{"id": "w1", "title": "impl"}])),
        executor_success(
            json!([{"gate": "tests", "passed": false, "evidence": "3 failed"}]),
            json!([]),
        ),
        planner_directive("Fix the tests", json!([])),
        executor_success(
            json!([{"gate": "tests", "passed": true, "evidence": "all passed"}]),
            json!(["w1"]),
        ),
    ]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner.clone(), store);

    let output = use_case
        .execute(RunSessionInput::new(
            "Implement with gates",
            params().with_blocking_gates(vec!["tests".to_string()]),
        ))
        .await
        .unwrap();

    assert!(output.completed());
    // The failed review is recorded as an error iteration.
    let errors: Vec<_> = output
        .session
        .iterations
        .iter()
        .filter(|it| it.outcome.is_error())
        .collect();
    assert_eq!(errors.len(), 1);
    match &errors[0].outcome {
        IterationOutcome::Error { category, .. } => {
            assert_eq!(*category, ErrorCategory::QualityGateFailure);
        }
        other => panic!("expected error outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_after_escalation_continues_from_history() {
    let runner = FakeRunner::new(vec![
        planner_directive("Touch the config", json!([])),
        executor_reported_error("security", "bad write"),
    ]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner, store.clone());
    let output = use_case
        .execute(RunSessionInput::new("Touch the config", params()))
        .await
        .unwrap();
    assert_eq!(output.session.status, SessionStatus::Paused);

    // Human resolved it; resume re-plans from history.
    let runner = FakeRunner::new(vec![planner_complete("Nothing left after manual fix")]);
    let use_case = RunSessionUseCase::new(runner, store.clone());
    let resumed = use_case
        .resume(&output.session.id, params())
        .await
        .unwrap();

    assert!(resumed.completed());
    assert_eq!(resumed.session.iterations.len(), 3);
    assert!(resumed.session.escalation.is_none());
}

#[tokio::test]
async fn resume_of_terminal_session_is_rejected() {
    let runner = FakeRunner::new(vec![planner_complete("done immediately")]);
    let store = InMemoryStore::new();
    let use_case = RunSessionUseCase::new(runner, store.clone());
    let output = use_case
        .execute(RunSessionInput::new("task", params()))
        .await
        .unwrap();
    assert!(output.completed());

    let runner = FakeRunner::new(vec![]);
    let use_case = RunSessionUseCase::new(runner, store);
    let err = use_case
        .resume(&output.session.id, params())
        .await
        .unwrap_err();
    assert!(matches!(err, RunSessionError::NotResumable { .. }));
}

#[tokio::test]
async fn store_corruption_rolls_back_once_and_pauses() {
    let store = InMemoryStore::new();
    let mut session = Session::new("task", None);
    let now = Utc::now();
    for seq in 0..2 {
        session.push_iteration(Iteration {
            seq,
            role: AgentRole::Planner,
            directive: "d".to_string(),
            events: Vec::new(),
            outcome: IterationOutcome::Continue,
            duration_ms: 1,
            started_at: now,
            ended_at: now,
        });
    }
    let id = session.id.clone();
    store.seed(session);
    store.corrupt_next_load(1);

    let runner = FakeRunner::new(vec![]);
    let use_case = RunSessionUseCase::new(runner, store.clone());
    let output = use_case.resume(&id, params()).await.unwrap();

    assert_eq!(output.session.status, SessionStatus::Paused);
    let record = output.session.escalation.as_ref().unwrap();
    assert_eq!(record.category, ErrorCategory::StoreCorruption);
    // Rolled back to the single intact iteration.
    assert_eq!(output.session.iterations.len(), 1);
}

#[tokio::test]
async fn cancellation_before_first_turn() {
    let runner = FakeRunner::new(vec![]);
    let store = InMemoryStore::new();
    let token = CancellationToken::new();
    token.cancel();
    let use_case = RunSessionUseCase::new(runner, store).with_cancellation(token);

    let err = use_case
        .execute(RunSessionInput::new("task", params()))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn events_are_forwarded_to_the_sink() {
    let runner = FakeRunner::new(vec![
        planner_directive("d", json!([{"id": "w1", "title": "step"}])),
        executor_success(json!([]), json!([])),
        planner_complete("ok"),
    ]);
    let store = InMemoryStore::new();
    let sink = Arc::new(CollectingSink::default());
    let use_case = RunSessionUseCase::new(runner, store).with_sink(sink.clone());

    let output = use_case
        .execute(RunSessionInput::new("task", params()))
        .await
        .unwrap();
    assert!(output.completed());

    let records = sink.records.lock().unwrap();
    // Two events per scripted turn.
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.session_id == output.session.id.to_string()));
    assert_eq!(records[0].iteration_seq, 0);
    assert_eq!(records[0].event_type, "text_chunk");
    assert_eq!(records[1].event_type, "structured_report");
    assert_eq!(records[5].iteration_seq, 2);
}
