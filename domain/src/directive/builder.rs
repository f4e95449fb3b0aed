//! Instruction building for agent turns.
//!
//! [`InstructionBuilder`] is a pure function of its arguments: the task,
//! the persisted iteration history, pending work items, and accumulated
//! constraints. It never reads ambient state, so identical inputs always
//! produce identical directives — required for replaying a session in
//! tests.
//!
//! Oversized output is rejected, not truncated: the caller is expected to
//! retry with a narrower scope rather than silently hand an agent half a
//! directive.

use crate::core::error::DomainError;
use crate::escalation::classifier::FailureSignal;
use crate::session::entities::Iteration;
use crate::work::entities::{WorkItem, WorkItemStatus};

/// How many trailing iterations are digested into a prompt.
const HISTORY_WINDOW: usize = 8;

/// Accumulated constraints carried across iterations.
#[derive(Debug, Clone, Default)]
pub struct DirectiveConstraints {
    /// Working directory the agents must stay inside
    pub working_dir: Option<String>,
    /// External tools the spawned agent may use
    pub allowed_tools: Vec<String>,
    /// Free-form constraints gathered along the way (human notes,
    /// planner guardrails)
    pub notes: Vec<String>,
}

impl DirectiveConstraints {
    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(dir) = &self.working_dir {
            out.push_str(&format!("- Work only inside: {dir}\n"));
        }
        if !self.allowed_tools.is_empty() {
            out.push_str(&format!(
                "- Allowed tools: {}\n",
                self.allowed_tools.join(", ")
            ));
        }
        for note in &self.notes {
            out.push_str(&format!("- {note}\n"));
        }
        out
    }
}

/// Builds the text handed to each agent turn.
#[derive(Debug, Clone)]
pub struct InstructionBuilder {
    max_directive_len: usize,
}

impl InstructionBuilder {
    pub fn new(max_directive_len: usize) -> Self {
        Self { max_directive_len }
    }

    /// Prompt for a Planner turn: the task, a digest of recent history,
    /// and the open work items the Planner should dispatch or close.
    pub fn planner_prompt(
        &self,
        task: &str,
        history: &[Iteration],
        items: &[WorkItem],
        constraints: &DirectiveConstraints,
    ) -> Result<String, DomainError> {
        let mut prompt = format!("Task:\n{task}\n");

        let open: Vec<&WorkItem> = items.iter().filter(|i| i.status.is_open()).collect();
        if !open.is_empty() {
            prompt.push_str("\nOpen work items:\n");
            for item in &open {
                prompt.push_str(&format!(
                    "- [{}] {} ({}, {})\n",
                    item.id,
                    item.title,
                    item.priority.as_str(),
                    item.status.as_str()
                ));
            }
        }

        if !history.is_empty() {
            prompt.push_str("\nRecent iterations:\n");
            for it in history.iter().rev().take(HISTORY_WINDOW).rev() {
                prompt.push_str(&format!("- {}\n", it.digest()));
            }
        }

        let rendered = constraints.render();
        if !rendered.is_empty() {
            prompt.push_str("\nConstraints:\n");
            prompt.push_str(&rendered);
        }

        prompt.push_str(
            "\nDecide the next step. Either emit a directive for the executor \
             (with any new work items), or declare the task complete.\n",
        );

        self.bounded(prompt)
    }

    /// Directive for an Executor turn, wrapping the Planner's directive
    /// with the focused work items and standing constraints.
    pub fn executor_directive(
        &self,
        task: &str,
        directive: &str,
        items: &[WorkItem],
        constraints: &DirectiveConstraints,
    ) -> Result<String, DomainError> {
        let mut out = format!("Task context:\n{task}\n\nDirective:\n{directive}\n");

        let pending: Vec<&WorkItem> = items
            .iter()
            .filter(|i| i.status == WorkItemStatus::Pending || i.status == WorkItemStatus::InProgress)
            .collect();
        if !pending.is_empty() {
            out.push_str("\nWork items in scope:\n");
            for item in &pending {
                out.push_str(&format!("- [{}] {}\n", item.id, item.title));
            }
        }

        let rendered = constraints.render();
        if !rendered.is_empty() {
            out.push_str("\nConstraints:\n");
            out.push_str(&rendered);
        }

        out.push_str(
            "\nWhen finished, emit a structured report with your status, a summary, \
             quality gate results, and the work item ids you completed.\n",
        );

        self.bounded(out)
    }

    /// Recovery directive after a failed Executor turn: the prior
    /// directive plus what went wrong, asking for a narrower attempt.
    pub fn recovery_directive(
        &self,
        task: &str,
        prior_directive: &str,
        failure: &FailureSignal,
        constraints: &DirectiveConstraints,
    ) -> Result<String, DomainError> {
        let mut out = format!(
            "Task context:\n{task}\n\nThe previous attempt failed ({}): {}\n\nPrevious directive:\n{prior_directive}\n",
            failure.category,
            crate::core::string::first_line(&failure.message),
        );

        let rendered = constraints.render();
        if !rendered.is_empty() {
            out.push_str("\nConstraints:\n");
            out.push_str(&rendered);
        }

        out.push_str(
            "\nRetry with a narrower scope: address the failure first, then continue \
             the directive. Emit a structured report when finished.\n",
        );

        self.bounded(out)
    }

    fn bounded(&self, directive: String) -> Result<String, DomainError> {
        if directive.len() > self.max_directive_len {
            return Err(DomainError::DirectiveTooLong {
                len: directive.len(),
                max: self.max_directive_len,
            });
        }
        Ok(directive)
    }
}

impl Default for InstructionBuilder {
    fn default() -> Self {
        Self::new(16 * 1024)
    }
}
