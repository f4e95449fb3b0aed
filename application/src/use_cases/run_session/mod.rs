//! Run Session use case — the coordination state machine.
//!
//! Drives the Planner/Executor handoff protocol across iterations:
//!
//! ```text
//! Planning -> AwaitingExecutor -> Reviewing -> { Planning (loop)
//!                                             | Completed
//!                                             | Escalated }
//! ```
//!
//! Transition rules:
//!
//! | State            | Outcome                         | Next               |
//! |------------------|---------------------------------|--------------------|
//! | Planning         | terminal decision               | Completed          |
//! | Planning         | directive                       | AwaitingExecutor   |
//! | AwaitingExecutor | success report                  | Reviewing          |
//! | AwaitingExecutor | error, classifier says retry    | AwaitingExecutor   |
//! | AwaitingExecutor | error, classifier says escalate | Escalated          |
//! | Reviewing        | all gates pass, no open items   | Completed          |
//! | Reviewing        | gates pass partially            | Planning           |
//! | Reviewing        | blocking gate, persistent       | Escalated          |
//!
//! Every iteration is durably appended before the next turn starts, and a
//! cancellation check runs between turns. Escalating always pairs the
//! record with a `Paused` session status.

pub mod gates;
mod types;

pub use types::{RunSessionError, RunSessionInput, RunSessionOutput};

use crate::config::ExecutionParams;
use crate::ports::agent_runner::{AgentRunner, TurnRequest, TurnResult};
use crate::ports::event_sink::{EventRecord, EventSink, NoEventSink};
use crate::ports::progress::{NoProgress, ProgressNotifier};
use crate::ports::session_store::{SessionStore, StoreError};
use crate::use_cases::shared::check_cancelled;
use chrono::{DateTime, Utc};
use duet_domain::{
    AgentEvent, AgentRole, DirectiveConstraints, DomainError, ErrorCategory, EscalationClassifier,
    ExecutorReport, FailureSignal, InstructionBuilder, Iteration, IterationOutcome,
    PlannerDecision, Session, SessionId, SessionStatus, Severity, WorkItem, WorkItemStatus,
};
use gates::GateEvaluation;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State of the coordination machine between turns.
#[derive(Debug)]
enum CoordinationState {
    Planning,
    AwaitingExecutor { directive: String },
    Reviewing { report: ExecutorReport, turn: TurnRecord },
}

impl CoordinationState {
    fn label(&self) -> &'static str {
        match self {
            CoordinationState::Planning => "planning",
            CoordinationState::AwaitingExecutor { .. } => "awaiting_executor",
            CoordinationState::Reviewing { .. } => "reviewing",
        }
    }
}

/// One step of the machine: continue in a new state, or stop.
enum Step {
    Next(CoordinationState),
    Done(RunSessionOutput),
}

/// Raw material of an iteration before its outcome is decided.
#[derive(Debug)]
struct TurnRecord {
    role: AgentRole,
    input: String,
    events: Vec<AgentEvent>,
    duration: Duration,
    started_at: DateTime<Utc>,
}

/// Use case driving one session to completion, escalation, or failure.
pub struct RunSessionUseCase<R: AgentRunner + 'static> {
    runner: Arc<R>,
    store: Arc<dyn SessionStore>,
    sink: Arc<dyn EventSink>,
    classifier: EscalationClassifier,
    cancellation_token: Option<CancellationToken>,
}

impl<R: AgentRunner + 'static> RunSessionUseCase<R> {
    pub fn new(runner: Arc<R>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            runner,
            store,
            sink: Arc::new(NoEventSink),
            classifier: EscalationClassifier::new(),
            cancellation_token: None,
        }
    }

    /// Set an event sink for the external collector
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set a cancellation token for graceful interruption
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Start a new session without progress reporting
    pub async fn execute(&self, input: RunSessionInput) -> Result<RunSessionOutput, RunSessionError> {
        self.execute_with_progress(input, &NoProgress).await
    }

    /// Start a new session with progress callbacks
    pub async fn execute_with_progress(
        &self,
        input: RunSessionInput,
        progress: &dyn ProgressNotifier,
    ) -> Result<RunSessionOutput, RunSessionError> {
        check_cancelled(&self.cancellation_token)?;

        let session = Session::new(input.task, input.params.working_dir.clone());
        self.store.create(&session).await?;

        info!(
            "Starting session {} for task: {}",
            session.id,
            duet_domain::truncate(&session.task, 80)
        );
        progress.on_session_start(&session.id, &session.task);

        self.drive(session, input.params, progress).await
    }

    /// Resume a paused (or crashed) session without progress reporting
    pub async fn resume(
        &self,
        id: &SessionId,
        params: ExecutionParams,
    ) -> Result<RunSessionOutput, RunSessionError> {
        self.resume_with_progress(id, params, &NoProgress).await
    }

    /// Resume a paused (or crashed) session with progress callbacks
    ///
    /// A session paused on an escalation clears its record and re-enters
    /// the loop from the last persisted iteration. Detected store
    /// corruption triggers one rollback, after which the session pauses
    /// with a `StoreCorruption` escalation so the human knows history was
    /// truncated; a second corruption is fatal.
    pub async fn resume_with_progress(
        &self,
        id: &SessionId,
        params: ExecutionParams,
        progress: &dyn ProgressNotifier,
    ) -> Result<RunSessionOutput, RunSessionError> {
        check_cancelled(&self.cancellation_token)?;

        let (mut session, recovered) = self.recover_load(id).await?;

        if session.status.is_terminal() {
            return Err(RunSessionError::NotResumable {
                id: id.to_string(),
                status: session.status,
            });
        }

        if recovered {
            // History was truncated; surface that to a human instead of
            // silently continuing on rolled-back state.
            let signal = FailureSignal::new(
                ErrorCategory::StoreCorruption,
                format!("history rolled back to {} iterations", session.iterations.len()),
            );
            let decision = self
                .classifier
                .classify(&signal, &[], session.next_seq());
            let record = decision
                .record
                .expect("store corruption is always escalation-worthy");
            progress.on_escalation(&record);
            session.pause_with(record);
            self.store.update_header(&session).await?;
            let summary = "History rolled back after store corruption; resume again to continue"
                .to_string();
            progress.on_session_end(session.status, &summary);
            return Ok(RunSessionOutput { session, summary });
        }

        if session.status == SessionStatus::Paused {
            info!("Resuming session {} after human resolution", session.id);
            session.resume();
            self.store.update_header(&session).await?;
        }

        progress.on_session_start(&session.id, &session.task);
        self.drive(session, params, progress).await
    }

    /// Load a session, attempting one rollback on detected corruption.
    ///
    /// Returns the session and whether a rollback happened.
    async fn recover_load(&self, id: &SessionId) -> Result<(Session, bool), RunSessionError> {
        match self.store.load(id).await {
            Ok(session) => Ok((session, false)),
            Err(StoreError::Corruption { kind, intact }) => {
                warn!(
                    "Session {} history corrupt ({}); rolling back to {} iterations",
                    id, kind, intact
                );
                match self.store.rollback(id, intact).await {
                    Ok(session) => Ok((session, true)),
                    Err(e) => Err(RunSessionError::CorruptBeyondRecovery(e.to_string())),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    // ==================== The state machine ====================

    async fn drive(
        &self,
        mut session: Session,
        params: ExecutionParams,
        progress: &dyn ProgressNotifier,
    ) -> Result<RunSessionOutput, RunSessionError> {
        let builder = InstructionBuilder::new(params.max_directive_len);
        let mut constraints = DirectiveConstraints {
            working_dir: params.working_dir.clone(),
            allowed_tools: params.allowed_tools.clone(),
            notes: Vec::new(),
        };
        let mut items = rebuild_work_items(&session);
        let mut failures = rebuild_failures(&session);
        let mut state = CoordinationState::Planning;

        loop {
            check_cancelled(&self.cancellation_token)?;

            if session.next_seq() as usize >= params.max_iterations {
                return self
                    .escalate_budget_exhausted(&mut session, &params, progress)
                    .await;
            }

            progress.on_state_change(state.label());
            let step = match state {
                CoordinationState::Planning => {
                    self.plan_turn(
                        &mut session,
                        &params,
                        &builder,
                        &mut constraints,
                        &mut items,
                        &mut failures,
                        progress,
                    )
                    .await?
                }
                CoordinationState::AwaitingExecutor { directive } => {
                    self.executor_turn(
                        &mut session,
                        &params,
                        &builder,
                        &mut constraints,
                        &mut items,
                        &mut failures,
                        directive,
                        progress,
                    )
                    .await?
                }
                CoordinationState::Reviewing { report, turn } => {
                    self.review(
                        &mut session,
                        &params,
                        &mut constraints,
                        &mut items,
                        &mut failures,
                        report,
                        turn,
                        progress,
                    )
                    .await?
                }
            };

            match step {
                Step::Next(next) => state = next,
                Step::Done(output) => {
                    self.runner.release_session(&session.id).await;
                    return Ok(output);
                }
            }
        }
    }

    /// Run a Planner turn and interpret its decision.
    #[allow(clippy::too_many_arguments)]
    async fn plan_turn(
        &self,
        session: &mut Session,
        params: &ExecutionParams,
        builder: &InstructionBuilder,
        constraints: &mut DirectiveConstraints,
        items: &mut Vec<WorkItem>,
        failures: &mut Vec<FailureSignal>,
        progress: &dyn ProgressNotifier,
    ) -> Result<Step, RunSessionError> {
        let prompt = builder.planner_prompt(&session.task, &session.iterations, items, constraints)?;
        let (record, result) = self
            .run_turn(session, AgentRole::Planner, prompt, params, progress)
            .await?;

        match result {
            TurnResult::Report(payload) => match PlannerDecision::parse(&payload) {
                Ok(PlannerDecision::Directive {
                    directive,
                    work_items,
                }) => {
                    debug!(
                        "Planner issued directive with {} new work items",
                        work_items.len()
                    );
                    merge_items(items, work_items);
                    failures.clear();
                    self.persist_iteration(session, record, IterationOutcome::Continue, progress)
                        .await?;
                    Ok(Step::Next(CoordinationState::AwaitingExecutor { directive }))
                }
                Ok(PlannerDecision::Complete { summary }) => {
                    self.persist_iteration(session, record, IterationOutcome::Complete, progress)
                        .await?;
                    Ok(Step::Done(
                        self.finish(session, SessionStatus::Completed, summary, progress)
                            .await?,
                    ))
                }
                Err(e) => {
                    let signal =
                        FailureSignal::new(ErrorCategory::MalformedOutput, e.to_string());
                    self.handle_failure(
                        session,
                        record,
                        signal,
                        failures,
                        CoordinationState::Planning,
                        progress,
                    )
                    .await
                }
            },
            TurnResult::Failed { category, message } => {
                let signal = FailureSignal::new(category, message);
                self.handle_failure(
                    session,
                    record,
                    signal,
                    failures,
                    CoordinationState::Planning,
                    progress,
                )
                .await
            }
        }
    }

    /// Run an Executor turn with the Planner's directive.
    #[allow(clippy::too_many_arguments)]
    async fn executor_turn(
        &self,
        session: &mut Session,
        params: &ExecutionParams,
        builder: &InstructionBuilder,
        constraints: &mut DirectiveConstraints,
        items: &mut Vec<WorkItem>,
        failures: &mut Vec<FailureSignal>,
        directive: String,
        progress: &dyn ProgressNotifier,
    ) -> Result<Step, RunSessionError> {
        let input =
            match builder.executor_directive(&session.task, &directive, items, constraints) {
                Ok(input) => input,
                Err(DomainError::DirectiveTooLong { len, max }) => {
                    // Rejected, not truncated — send the planner back for a
                    // narrower scope.
                    warn!("Directive rejected: {} bytes over the {} byte bound", len, max);
                    push_note(
                        constraints,
                        "The previous directive exceeded the length bound; plan a narrower step",
                    );
                    return Ok(Step::Next(CoordinationState::Planning));
                }
                Err(e) => return Err(e.into()),
            };

        let (record, result) = self
            .run_turn(session, AgentRole::Executor, input, params, progress)
            .await?;

        match result {
            TurnResult::Report(payload) => match ExecutorReport::parse(&payload) {
                Ok(report) if report.is_success() => Ok(Step::Next(CoordinationState::Reviewing {
                    report,
                    turn: record,
                })),
                Ok(report) => {
                    let signal = report
                        .failure
                        .as_ref()
                        .map(|f| f.to_signal())
                        .unwrap_or_else(|| {
                            FailureSignal::new(ErrorCategory::Other, report.summary.clone())
                        });
                    self.executor_failure(
                        session, builder, constraints, failures, &directive, record, signal,
                        progress,
                    )
                    .await
                }
                Err(e) => {
                    let signal =
                        FailureSignal::new(ErrorCategory::MalformedOutput, e.to_string());
                    self.executor_failure(
                        session, builder, constraints, failures, &directive, record, signal,
                        progress,
                    )
                    .await
                }
            },
            TurnResult::Failed { category, message } => {
                let signal = FailureSignal::new(category, message);
                self.executor_failure(
                    session, builder, constraints, failures, &directive, record, signal, progress,
                )
                .await
            }
        }
    }

    /// Executor failure: classify, then either escalate or re-enter
    /// AwaitingExecutor with a recovery directive.
    #[allow(clippy::too_many_arguments)]
    async fn executor_failure(
        &self,
        session: &mut Session,
        builder: &InstructionBuilder,
        constraints: &DirectiveConstraints,
        failures: &mut Vec<FailureSignal>,
        directive: &str,
        turn: TurnRecord,
        signal: FailureSignal,
        progress: &dyn ProgressNotifier,
    ) -> Result<Step, RunSessionError> {
        let recovery = builder.recovery_directive(&session.task, directive, &signal, constraints)?;
        self.handle_failure(
            session,
            turn,
            signal,
            failures,
            CoordinationState::AwaitingExecutor {
                directive: recovery,
            },
            progress,
        )
        .await
    }

    /// Common failure path for both roles.
    async fn handle_failure(
        &self,
        session: &mut Session,
        turn: TurnRecord,
        signal: FailureSignal,
        failures: &mut Vec<FailureSignal>,
        retry_state: CoordinationState,
        progress: &dyn ProgressNotifier,
    ) -> Result<Step, RunSessionError> {
        let decision = self
            .classifier
            .classify(&signal, failures, session.next_seq() + 1);
        let category = signal.category;
        let message = signal.message.clone();
        failures.push(signal);

        if decision.should_escalate {
            let record = decision
                .record
                .expect("escalating decision carries a record");
            self.persist_iteration(session, turn, IterationOutcome::Escalate, progress)
                .await?;
            progress.on_escalation(&record);
            let summary = record.description.clone();
            session.pause_with(record);
            self.store.update_header(session).await?;
            progress.on_session_end(session.status, &summary);
            Ok(Step::Done(RunSessionOutput {
                session: session.clone(),
                summary,
            }))
        } else {
            info!(
                "Turn failed ({}), retrying under classifier budget: {}",
                category,
                duet_domain::truncate(&message, 120)
            );
            self.persist_iteration(
                session,
                turn,
                IterationOutcome::Error { category, message },
                progress,
            )
            .await?;
            Ok(Step::Next(retry_state))
        }
    }

    /// Review an Executor success report against the quality gates.
    #[allow(clippy::too_many_arguments)]
    async fn review(
        &self,
        session: &mut Session,
        params: &ExecutionParams,
        constraints: &mut DirectiveConstraints,
        items: &mut Vec<WorkItem>,
        failures: &mut Vec<FailureSignal>,
        report: ExecutorReport,
        turn: TurnRecord,
        progress: &dyn ProgressNotifier,
    ) -> Result<Step, RunSessionError> {
        match gates::evaluate(&report.gates, params) {
            GateEvaluation::AllPassed => {
                mark_done(items, &report.completed_items);
                failures.clear();
                let open = items.iter().any(|i| i.status.is_open());
                if open {
                    self.persist_iteration(session, turn, IterationOutcome::Continue, progress)
                        .await?;
                    Ok(Step::Next(CoordinationState::Planning))
                } else {
                    self.persist_iteration(session, turn, IterationOutcome::Complete, progress)
                        .await?;
                    let summary = if report.summary.is_empty() {
                        "All quality gates passed".to_string()
                    } else {
                        report.summary.clone()
                    };
                    Ok(Step::Done(
                        self.finish(session, SessionStatus::Completed, summary, progress)
                            .await?,
                    ))
                }
            }
            GateEvaluation::Partial { failed } => {
                mark_done(items, &report.completed_items);
                failures.clear();
                push_note(
                    constraints,
                    &format!("Close the failing quality gates: {}", failed.join(", ")),
                );
                self.persist_iteration(session, turn, IterationOutcome::Continue, progress)
                    .await?;
                Ok(Step::Next(CoordinationState::Planning))
            }
            GateEvaluation::Blocking { failed } => {
                let signal = FailureSignal::new(
                    ErrorCategory::QualityGateFailure,
                    format!("blocking gates failed: {}", failed.join(", ")),
                );
                push_note(
                    constraints,
                    &format!("Fix the blocking quality gates: {}", failed.join(", ")),
                );
                self.handle_failure(
                    session,
                    turn,
                    signal,
                    failures,
                    CoordinationState::Planning,
                    progress,
                )
                .await
            }
        }
    }

    // ==================== Turn plumbing ====================

    /// Run one agent turn, forwarding events to the sink and progress.
    async fn run_turn(
        &self,
        session: &Session,
        role: AgentRole,
        input: String,
        params: &ExecutionParams,
        progress: &dyn ProgressNotifier,
    ) -> Result<(TurnRecord, TurnResult), RunSessionError> {
        let seq = session.next_seq();
        progress.on_turn_start(role, seq);
        let started_at = Utc::now();

        let request = TurnRequest {
            session_id: session.id.clone(),
            role,
            input: input.clone(),
            timeout: params.turn_timeout,
            cancellation: self.cancellation_token.clone().unwrap_or_default(),
        };
        let outcome = self.runner.run_turn(request).await?;

        for event in &outcome.events {
            progress.on_event(event);
            // Fire-and-forget: sink failures never fail the turn.
            self.sink.emit(EventRecord::from_event(&session.id, seq, event));
        }

        Ok((
            TurnRecord {
                role,
                input,
                events: outcome.events,
                duration: outcome.duration,
                started_at,
            },
            outcome.result,
        ))
    }

    /// Durably append the iteration before anything else happens.
    async fn persist_iteration(
        &self,
        session: &mut Session,
        turn: TurnRecord,
        outcome: IterationOutcome,
        progress: &dyn ProgressNotifier,
    ) -> Result<(), RunSessionError> {
        let seq = session.next_seq();
        let iteration = Iteration {
            seq,
            role: turn.role,
            directive: turn.input,
            events: turn.events,
            outcome: outcome.clone(),
            duration_ms: turn.duration.as_millis() as u64,
            started_at: turn.started_at,
            ended_at: Utc::now(),
        };
        self.store.append(&session.id, &iteration).await?;
        session.push_iteration(iteration);
        progress.on_iteration(turn.role, seq, &outcome);
        Ok(())
    }

    async fn finish(
        &self,
        session: &mut Session,
        status: SessionStatus,
        summary: String,
        progress: &dyn ProgressNotifier,
    ) -> Result<RunSessionOutput, RunSessionError> {
        match status {
            SessionStatus::Completed => session.complete(),
            SessionStatus::Failed => session.fail(),
            _ => unreachable!("finish is only called with terminal statuses"),
        }
        self.store.update_header(session).await?;
        info!("Session {} finished: {}", session.id, status);
        progress.on_session_end(session.status, &summary);
        Ok(RunSessionOutput {
            session: session.clone(),
            summary,
        })
    }

    /// Forced escalation once the iteration budget is spent.
    async fn escalate_budget_exhausted(
        &self,
        session: &mut Session,
        params: &ExecutionParams,
        progress: &dyn ProgressNotifier,
    ) -> Result<RunSessionOutput, RunSessionError> {
        let signal = FailureSignal::new(
            ErrorCategory::Other,
            format!(
                "iteration budget of {} exhausted without completion",
                params.max_iterations
            ),
        )
        .with_severity(Severity::Critical);
        let decision = self.classifier.classify(&signal, &[], session.next_seq());
        let record = decision.record.expect("critical failures always escalate");

        progress.on_escalation(&record);
        let summary = record.description.clone();
        session.pause_with(record);
        self.store.update_header(session).await?;
        progress.on_session_end(session.status, &summary);
        Ok(RunSessionOutput {
            session: session.clone(),
            summary,
        })
    }
}

// ==================== Free helpers ====================

/// Merge newly decomposed work items into the running list.
///
/// The planner may re-emit an item to retitle or reprioritize it; a
/// finished item stays finished.
fn merge_items(items: &mut Vec<WorkItem>, new_items: Vec<WorkItem>) {
    for item in new_items {
        match items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => {
                if existing.status != WorkItemStatus::Done {
                    *existing = item;
                }
            }
            None => items.push(item),
        }
    }
}

/// Mark the work items the Executor claims finished.
fn mark_done(items: &mut [WorkItem], completed_ids: &[String]) {
    for item in items.iter_mut() {
        if completed_ids.contains(&item.id) {
            item.status = WorkItemStatus::Done;
        }
    }
}

fn push_note(constraints: &mut DirectiveConstraints, note: &str) {
    if !constraints.notes.iter().any(|n| n == note) {
        constraints.notes.push(note.to_string());
    }
}

/// Rebuild the work-item list from persisted history (resume path).
fn rebuild_work_items(session: &Session) -> Vec<WorkItem> {
    let mut items = Vec::new();
    for iteration in &session.iterations {
        for event in &iteration.events {
            let Some(payload) = event.report_payload() else {
                continue;
            };
            match iteration.role {
                AgentRole::Planner => {
                    if let Ok(PlannerDecision::Directive { work_items, .. }) =
                        PlannerDecision::parse(payload)
                    {
                        merge_items(&mut items, work_items);
                    }
                }
                AgentRole::Executor => {
                    if let Ok(report) = ExecutorReport::parse(payload) {
                        mark_done(&mut items, &report.completed_items);
                    }
                }
            }
        }
    }
    items
}

/// Rebuild the trailing failure run from persisted history (resume path).
fn rebuild_failures(session: &Session) -> Vec<FailureSignal> {
    session
        .trailing_errors()
        .iter()
        .map(|it| match &it.outcome {
            IterationOutcome::Error { category, message } => {
                FailureSignal::new(*category, message.clone())
            }
            _ => unreachable!("trailing_errors returns only error iterations"),
        })
        .collect()
}

#[cfg(test)]
mod tests;
