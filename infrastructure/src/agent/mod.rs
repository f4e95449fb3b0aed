//! Agent process adapters: command construction, stream parsing, handle
//! tracking, and turn supervision.

pub mod command;
pub mod handle;
pub mod stream;
pub mod supervisor;

pub use command::{AgentProcessConfig, ReusePolicy};
pub use handle::{HandleRegistry, HandleState, ProcessHandle};
pub use stream::StreamParser;
pub use supervisor::{ProcessSupervisor, SupervisorConfig};
