//! Execution parameters — coordination loop control.
//!
//! [`ExecutionParams`] groups the static parameters that control one
//! session run: iteration budget, per-turn timeout, directive bounds, and
//! quality-gate policy. These are application-layer concerns; process
//! pool sizing lives with the supervisor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordination loop control parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionParams {
    /// Maximum iterations before forced escalation.
    pub max_iterations: usize,
    /// Wall-clock bound for each agent turn.
    pub turn_timeout: Duration,
    /// Maximum directive length in bytes; longer directives are rejected
    /// so the planner can be asked for a narrower scope.
    pub max_directive_len: usize,
    /// Minimum fraction of passing gates; below this a review counts as
    /// a blocking failure.
    pub gate_pass_threshold: f64,
    /// Gates that block on failure regardless of the pass ratio.
    pub blocking_gates: Vec<String>,
    /// Working directory the agents operate in.
    pub working_dir: Option<String>,
    /// External tools the spawned agents may use.
    pub allowed_tools: Vec<String>,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            turn_timeout: Duration::from_secs(300),
            max_directive_len: 16 * 1024,
            gate_pass_threshold: 0.5,
            blocking_gates: Vec::new(),
            working_dir: None,
            allowed_tools: Vec::new(),
        }
    }
}

impl ExecutionParams {
    // ==================== Builder Methods ====================

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_gate_pass_threshold(mut self, threshold: f64) -> Self {
        self.gate_pass_threshold = threshold;
        self
    }

    pub fn with_blocking_gates(mut self, gates: Vec<String>) -> Self {
        self.blocking_gates = gates;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let params = ExecutionParams::default();
        assert_eq!(params.max_iterations, 30);
        assert_eq!(params.turn_timeout, Duration::from_secs(300));
        assert!(params.blocking_gates.is_empty());
        assert!(params.working_dir.is_none());
    }

    #[test]
    fn test_builder() {
        let params = ExecutionParams::default()
            .with_max_iterations(5)
            .with_turn_timeout(Duration::from_secs(30))
            .with_blocking_gates(vec!["tests".to_string()])
            .with_working_dir("/tmp/repo");

        assert_eq!(params.max_iterations, 5);
        assert_eq!(params.blocking_gates, vec!["tests".to_string()]);
        assert_eq!(params.working_dir, Some("/tmp/repo".to_string()));
    }
}
