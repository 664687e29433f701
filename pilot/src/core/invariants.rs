//! Run invariants checked by the orchestrator after every transition.

use crate::core::state::OrchestrationState;
use crate::core::types::Phase;

/// Check the invariants that must hold when the orchestrator enters `phase`:
/// - `Executing` requires a non-empty plan
/// - the final response is set iff the phase is `Terminated`
/// - history holds exactly the seed records plus `executed` steps
pub fn validate_invariants(state: &OrchestrationState, phase: Phase, executed: usize) -> Vec<String> {
    let mut errors = Vec::new();

    if phase == Phase::Executing && state.plan().is_none_or(|plan| plan.is_empty()) {
        errors.push("executing with an empty plan".to_string());
    }

    let terminal = phase == Phase::Terminated;
    if state.is_terminal() != terminal {
        errors.push(format!(
            "{phase}: final response {} but phase is {}terminal",
            if state.is_terminal() { "set" } else { "unset" },
            if terminal { "" } else { "not " }
        ));
    }

    let expected = state.seeded_steps() + executed;
    if state.history().len() != expected {
        errors.push(format!(
            "history has {} entries, expected {} seed + {} executed",
            state.history().len(),
            state.seeded_steps(),
            executed
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{History, Plan, StepRecord, TerminationReason};

    #[test]
    fn executing_without_plan_is_reported() {
        let state = OrchestrationState::new("goal", History::new());
        let errors = validate_invariants(&state, Phase::Executing, 0);
        assert!(errors.iter().any(|err| err.contains("empty plan")));
    }

    #[test]
    fn terminal_mismatch_is_reported() {
        let mut state = OrchestrationState::new("goal", History::new());
        assert!(!validate_invariants(&state, Phase::Terminated, 0).is_empty());
        state.terminate(TerminationReason::Finished, "done");
        assert!(validate_invariants(&state, Phase::Terminated, 0).is_empty());
        assert!(!validate_invariants(&state, Phase::Replanning, 0).is_empty());
    }

    #[test]
    fn history_length_tracks_executed_steps() {
        let mut state = OrchestrationState::new("goal", History::new());
        state.set_initial_plan(Plan::new(["a"]).expect("plan"));
        state.record_step(StepRecord::new("a", "ok"));
        assert!(validate_invariants(&state, Phase::Replanning, 1).is_empty());
        let errors = validate_invariants(&state, Phase::Replanning, 0);
        assert!(errors.iter().any(|err| err.contains("history has 1 entries")));
    }
}
