//! Domain layer for duet
//!
//! This crate contains the core entities and coordination policy. It has
//! no dependencies on infrastructure or presentation concerns — no async
//! runtime, no I/O.
//!
//! # Core Concepts
//!
//! ## Planner / Executor
//!
//! duet coordinates two external agent roles through repeated turns:
//!
//! - **Planner**: decomposes the task, reviews progress, decides when to
//!   stop
//! - **Executor**: implements one directive at a time
//!
//! ## Escalation
//!
//! When automated retries stop making progress, the classifier hands the
//! session to a human with an [`EscalationRecord`] and the session pauses
//! until resolved.

pub mod core;
pub mod directive;
pub mod escalation;
pub mod session;
pub mod work;

// Re-export commonly used types
pub use crate::core::{error::DomainError, string::truncate};
pub use directive::builder::{DirectiveConstraints, InstructionBuilder};
pub use escalation::{
    classifier::{ClassifierDecision, EscalationClassifier, FailureSignal},
    entities::{ErrorCategory, ErrorSignature, EscalationRecord, Severity},
};
pub use session::{
    entities::{
        AgentRole, Iteration, IterationOutcome, Session, SessionId, SessionStatus,
    },
    event::{AgentEvent, EventKind},
    report::{ExecutorReport, PlannerDecision, ReportStatus, ReportedFailure, report_role},
};
pub use work::entities::{Priority, QualityGateResult, WorkItem, WorkItemStatus};
