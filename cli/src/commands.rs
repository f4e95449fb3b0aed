//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for duet
#[derive(Parser, Debug)]
#[command(name = "duet")]
#[command(author, version, about = "Planner/Executor coordination for long-running agent tasks")]
#[command(long_about = r#"
duet drives two external coding agents — a Planner and an Executor —
through repeated iterations until a task completes, blocks, or escalates
to a human.

Each iteration is persisted as it happens, so a crashed or escalated
session can be inspected (duet show) and resumed (duet resume) without
starting over.

Configuration files are loaded from (in priority order):
1. --config <path>   Explicit config file
2. ./duet.toml       Project-level config
3. ~/.config/duet/config.toml   Global config

Example:
  duet run "Migrate the config parser to the new schema"
  duet run -C /work/repo --max-iterations 10 "Fix the flaky CI test"
  duet resume 4cf3c2e8-6c9e-4f0a-9d3e-2e1f5b8a7c10
"#)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long, global = true)]
    pub no_config: bool,

    /// Write diagnostic logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a new session for a task
    Run {
        /// The task description handed to the Planner
        task: String,

        /// Working directory the agents operate in
        #[arg(short = 'C', long, value_name = "DIR")]
        working_dir: Option<String>,

        /// Override the configured iteration budget
        #[arg(long, value_name = "N")]
        max_iterations: Option<usize>,
    },

    /// Resume a paused or interrupted session
    Resume {
        /// Session id as printed by run/list
        session_id: String,
    },

    /// Show a persisted session (read-only)
    Show {
        /// Session id as printed by run/list
        session_id: String,
    },

    /// List persisted session ids
    List,

    /// Show configuration file locations and exit
    ConfigSources,
}
