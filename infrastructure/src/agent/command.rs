//! Agent process invocation.
//!
//! Builds the `tokio::process::Command` for one agent role. The agent is
//! an opaque external binary driven by flags: model selector, role tag,
//! structured output, headless execution, permission mode, and the
//! allowed tool list. The directive arrives on stdin; newline-delimited
//! records come back on stdout.
//!
//! The child inherits the parent environment untouched — any credentials
//! the agent needs pass straight through and are never inspected here.

use duet_domain::AgentRole;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Whether a process is reused across a session's turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Fresh process per turn (default)
    #[default]
    PerTurn,
    /// One warm process per (session, role), discarded on any failure
    SessionAffinity,
}

/// Static configuration for spawning agent processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProcessConfig {
    /// Agent binary on PATH (or an absolute path)
    pub binary: String,
    /// Model selector passed to Planner turns
    pub planner_model: String,
    /// Model selector passed to Executor turns
    pub executor_model: String,
    /// Permission mode flag for the agent's own tool sandbox
    pub permission_mode: String,
    /// External tools the agent may invoke
    pub allowed_tools: Vec<String>,
    /// Working directory for the spawned process
    pub working_dir: Option<String>,
    /// Process reuse policy
    pub reuse: ReusePolicy,
    /// Grace period between SIGTERM and SIGKILL
    pub grace_period: Duration,
}

impl Default for AgentProcessConfig {
    fn default() -> Self {
        Self {
            binary: "duet-agent".to_string(),
            planner_model: "planner-large".to_string(),
            executor_model: "executor-standard".to_string(),
            permission_mode: "workspace-write".to_string(),
            allowed_tools: Vec::new(),
            working_dir: None,
            reuse: ReusePolicy::default(),
            grace_period: Duration::from_secs(5),
        }
    }
}

impl AgentProcessConfig {
    pub fn model_for(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Planner => &self.planner_model,
            AgentRole::Executor => &self.executor_model,
        }
    }

    /// Build the command for one turn.
    ///
    /// `serve` keeps the process alive across directives (session
    /// affinity): directives are then framed as single JSON lines on
    /// stdin instead of stdin-until-EOF.
    pub fn build_command(&self, role: AgentRole, serve: bool) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--role")
            .arg(role.as_str())
            .arg("--model")
            .arg(self.model_for(role))
            .arg("--output-format")
            .arg("ndjson")
            .arg("--headless")
            .arg("--permission-mode")
            .arg(&self.permission_mode);

        if !self.allowed_tools.is_empty() {
            cmd.arg("--allowed-tools").arg(self.allowed_tools.join(","));
        }
        if serve {
            cmd.arg("--serve");
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            // Backstop: if a guard is dropped with the child still
            // running, the OS process dies with the Child value.
            .kill_on_drop(true);

        // Linux: request kernel to send SIGTERM to child when parent
        // dies. This catches cases where Drop doesn't run (SIGKILL, OOM
        // kill).
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                Ok(())
            });
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_follows_role() {
        let config = AgentProcessConfig::default();
        assert_eq!(config.model_for(AgentRole::Planner), "planner-large");
        assert_eq!(config.model_for(AgentRole::Executor), "executor-standard");
    }

    #[test]
    fn command_carries_role_flags() {
        let config = AgentProcessConfig {
            allowed_tools: vec!["bash".to_string(), "edit".to_string()],
            ..Default::default()
        };
        let cmd = config.build_command(AgentRole::Planner, false);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"planner".to_string()));
        assert!(args.contains(&"ndjson".to_string()));
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"bash,edit".to_string()));
        assert!(!args.contains(&"--serve".to_string()));
    }

    #[test]
    fn serve_flag_is_appended_for_affinity() {
        let config = AgentProcessConfig::default();
        let cmd = config.build_command(AgentRole::Executor, true);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert!(args.contains(&"--serve".to_string()));
    }
}
