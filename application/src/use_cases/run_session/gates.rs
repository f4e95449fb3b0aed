//! Quality-gate evaluation for the Reviewing state.

use crate::config::ExecutionParams;
use duet_domain::QualityGateResult;

/// Outcome of reviewing an Executor report's gates.
#[derive(Debug, Clone, PartialEq)]
pub enum GateEvaluation {
    /// Every reported gate passed
    AllPassed,
    /// Some gates failed but none are blocking; the planner should focus
    /// the next directive on the gap
    Partial { failed: Vec<String> },
    /// A blocking gate failed, or the pass ratio fell below the
    /// configured threshold
    Blocking { failed: Vec<String> },
}

impl GateEvaluation {
    pub fn failed_gates(&self) -> &[String] {
        match self {
            GateEvaluation::AllPassed => &[],
            GateEvaluation::Partial { failed } | GateEvaluation::Blocking { failed } => failed,
        }
    }
}

/// Evaluate a report's gates against the configured policy.
///
/// A report with no gates has nothing to check and counts as passed —
/// gate *presence* is the planner's responsibility, enforced through the
/// directives it writes.
pub fn evaluate(gates: &[QualityGateResult], params: &ExecutionParams) -> GateEvaluation {
    if gates.is_empty() {
        return GateEvaluation::AllPassed;
    }

    let failed: Vec<String> = gates
        .iter()
        .filter(|g| !g.passed)
        .map(|g| g.gate.clone())
        .collect();
    if failed.is_empty() {
        return GateEvaluation::AllPassed;
    }

    let blocking_hit = failed
        .iter()
        .any(|name| params.blocking_gates.iter().any(|b| b == name));
    let pass_ratio = (gates.len() - failed.len()) as f64 / gates.len() as f64;

    if blocking_hit || pass_ratio < params.gate_pass_threshold {
        GateEvaluation::Blocking { failed }
    } else {
        GateEvaluation::Partial { failed }
    }
}
