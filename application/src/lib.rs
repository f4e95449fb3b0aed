//! Application layer for duet
//!
//! This crate contains use cases, port definitions, and application
//! configuration. It depends only on the domain layer.

pub mod config;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use config::ExecutionParams;
pub use ports::{
    agent_runner::{AgentRunner, RunnerError, TurnOutcome, TurnRequest, TurnResult},
    event_sink::{EventRecord, EventSink, NoEventSink},
    progress::{NoProgress, ProgressNotifier},
    session_store::{Corruption, SessionStore, StoreError},
};
pub use use_cases::run_session::{
    RunSessionError, RunSessionInput, RunSessionOutput, RunSessionUseCase,
};
