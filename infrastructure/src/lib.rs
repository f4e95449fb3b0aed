//! Infrastructure layer for duet
//!
//! This crate contains adapters that implement the ports defined in the
//! application layer: agent process supervision, JSONL session
//! persistence, event-sink delivery, and configuration file loading.

pub mod agent;
pub mod config;
pub mod sink;
pub mod store;

// Re-export commonly used types
pub use agent::{
    AgentProcessConfig, HandleRegistry, ProcessSupervisor, ReusePolicy, StreamParser,
    SupervisorConfig,
};
pub use config::{ConfigLoader, ConfigValidationError, FileConfig};
pub use sink::HttpEventSink;
pub use store::JsonlSessionStore;
