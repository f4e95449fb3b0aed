//! File configuration schema.
//!
//! The on-disk `duet.toml` shape, with defaults for every field so a
//! partial file (or none at all) still yields a working configuration.
//! Sections map onto the consumers: `[agent]` and `[supervisor]` feed
//! the process supervisor, `[execution]` the coordination loop,
//! `[store]` and `[sink]` the persistence and collector adapters.

use crate::agent::command::{AgentProcessConfig, ReusePolicy};
use crate::agent::supervisor::SupervisorConfig;
use duet_application::ExecutionParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Problems a config file can have beyond TOML syntax.
#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("agent.binary must not be empty")]
    EmptyBinary,

    #[error("supervisor.max_concurrent_turns must be at least 1")]
    ZeroPool,

    #[error("execution.turn_timeout_secs must be greater than 0")]
    ZeroTimeout,

    #[error("execution.gate_pass_threshold must be within 0.0..=1.0 (got {0})")]
    BadThreshold(f64),
}

/// `[agent]` — how agent processes are spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAgentConfig {
    pub binary: String,
    pub planner_model: String,
    pub executor_model: String,
    pub permission_mode: String,
    pub allowed_tools: Vec<String>,
    pub reuse: ReusePolicy,
    pub grace_period_secs: u64,
}

impl Default for FileAgentConfig {
    fn default() -> Self {
        let defaults = AgentProcessConfig::default();
        Self {
            binary: defaults.binary,
            planner_model: defaults.planner_model,
            executor_model: defaults.executor_model,
            permission_mode: defaults.permission_mode,
            allowed_tools: defaults.allowed_tools,
            reuse: defaults.reuse,
            grace_period_secs: defaults.grace_period.as_secs(),
        }
    }
}

/// `[execution]` — coordination loop control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileExecutionConfig {
    pub max_iterations: usize,
    pub turn_timeout_secs: u64,
    pub max_directive_len: usize,
    pub gate_pass_threshold: f64,
    pub blocking_gates: Vec<String>,
}

impl Default for FileExecutionConfig {
    fn default() -> Self {
        let defaults = ExecutionParams::default();
        Self {
            max_iterations: defaults.max_iterations,
            turn_timeout_secs: defaults.turn_timeout.as_secs(),
            max_directive_len: defaults.max_directive_len,
            gate_pass_threshold: defaults.gate_pass_threshold,
            blocking_gates: defaults.blocking_gates,
        }
    }
}

/// `[supervisor]` — process pool bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSupervisorConfig {
    pub max_concurrent_turns: usize,
    pub queue_timeout_secs: u64,
}

impl Default for FileSupervisorConfig {
    fn default() -> Self {
        let defaults = SupervisorConfig::default();
        Self {
            max_concurrent_turns: defaults.max_concurrent_turns,
            queue_timeout_secs: defaults.queue_timeout.as_secs(),
        }
    }
}

/// `[store]` — session persistence location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    pub sessions_dir: String,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            sessions_dir: ".duet/sessions".to_string(),
        }
    }
}

/// `[sink]` — optional event collector.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileSinkConfig {
    /// Ingestion endpoint URL; events are dropped when unset.
    pub endpoint: Option<String>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub agent: FileAgentConfig,
    pub execution: FileExecutionConfig,
    pub supervisor: FileSupervisorConfig,
    pub store: FileStoreConfig,
    pub sink: FileSinkConfig,
}

impl FileConfig {
    /// Cross-field validation after deserialization.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.agent.binary.trim().is_empty() {
            return Err(ConfigValidationError::EmptyBinary);
        }
        if self.supervisor.max_concurrent_turns == 0 {
            return Err(ConfigValidationError::ZeroPool);
        }
        if self.execution.turn_timeout_secs == 0 {
            return Err(ConfigValidationError::ZeroTimeout);
        }
        let threshold = self.execution.gate_pass_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigValidationError::BadThreshold(threshold));
        }
        Ok(())
    }

    /// Loop parameters for one run. `working_dir` comes from the CLI and
    /// overrides nothing in the file — it simply isn't a file concern.
    pub fn execution_params(&self, working_dir: Option<String>) -> ExecutionParams {
        ExecutionParams {
            max_iterations: self.execution.max_iterations,
            turn_timeout: Duration::from_secs(self.execution.turn_timeout_secs),
            max_directive_len: self.execution.max_directive_len,
            gate_pass_threshold: self.execution.gate_pass_threshold,
            blocking_gates: self.execution.blocking_gates.clone(),
            working_dir,
            allowed_tools: self.agent.allowed_tools.clone(),
        }
    }

    /// Spawn configuration for the supervisor.
    pub fn agent_process_config(&self, working_dir: Option<String>) -> AgentProcessConfig {
        AgentProcessConfig {
            binary: self.agent.binary.clone(),
            planner_model: self.agent.planner_model.clone(),
            executor_model: self.agent.executor_model.clone(),
            permission_mode: self.agent.permission_mode.clone(),
            allowed_tools: self.agent.allowed_tools.clone(),
            working_dir,
            reuse: self.agent.reuse,
            grace_period: Duration::from_secs(self.agent.grace_period_secs),
        }
    }

    /// Pool bounds for the supervisor.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            max_concurrent_turns: self.supervisor.max_concurrent_turns,
            queue_timeout: Duration::from_secs(self.supervisor.queue_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(FileConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [agent]
            binary = "my-agent"

            [execution]
            max_iterations = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.binary, "my-agent");
        assert_eq!(config.execution.max_iterations, 10);
        // Untouched sections keep defaults.
        assert_eq!(config.supervisor.max_concurrent_turns, 4);
        assert!(config.sink.endpoint.is_none());
    }

    #[test]
    fn bad_threshold_is_rejected() {
        let mut config = FileConfig::default();
        config.execution.gate_pass_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::BadThreshold(_))
        ));
    }

    #[test]
    fn zero_pool_is_rejected() {
        let mut config = FileConfig::default();
        config.supervisor.max_concurrent_turns = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::ZeroPool)
        ));
    }

    #[test]
    fn reuse_policy_parses_from_toml() {
        let config: FileConfig = toml::from_str(
            r#"
            [agent]
            reuse = "session_affinity"
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.reuse, ReusePolicy::SessionAffinity);
    }

    #[test]
    fn conversions_carry_fields_through() {
        let config: FileConfig = toml::from_str(
            r#"
            [agent]
            allowed_tools = ["bash", "edit"]

            [execution]
            turn_timeout_secs = 120
            "#,
        )
        .unwrap();
        let params = config.execution_params(Some("/work".to_string()));
        assert_eq!(params.turn_timeout, Duration::from_secs(120));
        assert_eq!(params.allowed_tools, vec!["bash", "edit"]);
        assert_eq!(params.working_dir, Some("/work".to_string()));

        let process = config.agent_process_config(Some("/work".to_string()));
        assert_eq!(process.allowed_tools, vec!["bash", "edit"]);
    }
}
