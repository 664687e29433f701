//! Orchestration state and its transition functions.
//!
//! [`OrchestrationState`] is the only mutable aggregate of a run. Fields are
//! private; every change goes through one of the transition methods below so
//! the counter, plan and history invariants hold after each call.

use serde::Serialize;

use crate::core::types::{FinalResponse, History, Plan, StepRecord, TerminationReason};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestrationState {
    goal: String,
    plan: Option<Plan>,
    history: History,
    /// Number of seed records present before the first executed step.
    seeded: usize,
    replan_count: u32,
    final_response: Option<FinalResponse>,
}

impl OrchestrationState {
    pub fn new(goal: impl Into<String>, seed: History) -> Self {
        let seeded = seed.len();
        Self {
            goal: goal.into(),
            plan: None,
            history: seed,
            seeded,
            replan_count: 0,
            final_response: None,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn replan_count(&self) -> u32 {
        self.replan_count
    }

    pub fn final_response(&self) -> Option<&FinalResponse> {
        self.final_response.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.final_response.is_some()
    }

    /// Steps executed by this run, excluding seed records.
    pub fn completed_steps(&self) -> usize {
        self.history.len() - self.seeded
    }

    pub fn seeded_steps(&self) -> usize {
        self.seeded
    }

    /// `Init → Planning`: install the initial plan.
    pub fn set_initial_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.replan_count = 0;
    }

    /// `Executing → Replanning`: append the executed step.
    pub fn record_step(&mut self, record: StepRecord) {
        self.history.push(record);
    }

    /// `Replanning → Executing`: replace the plan and count the decision.
    pub fn apply_replan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.replan_count += 1;
    }

    /// `Replanning → Terminated`: count the decision and set the response.
    pub fn finish_by_replan(&mut self, reason: TerminationReason, text: impl Into<String>) {
        self.replan_count += 1;
        self.terminate(reason, text);
    }

    /// Terminate without a replanner decision (cancellation).
    pub fn terminate(&mut self, reason: TerminationReason, text: impl Into<String>) {
        if self.final_response.is_some() {
            return;
        }
        self.final_response = Some(FinalResponse {
            reason,
            text: text.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(steps: &[&str]) -> Plan {
        Plan::new(steps.iter().copied()).expect("plan")
    }

    #[test]
    fn new_state_counts_seed_records_separately() {
        let seed = History::seeded(vec![StepRecord::new("create_session", "ok")]);
        let mut state = OrchestrationState::new("goal", seed);
        assert_eq!(state.seeded_steps(), 1);
        assert_eq!(state.completed_steps(), 0);

        state.set_initial_plan(plan(&["a"]));
        state.record_step(StepRecord::new("a", "done"));
        assert_eq!(state.history().len(), 2);
        assert_eq!(state.completed_steps(), 1);
    }

    #[test]
    fn replans_increment_counter_by_one() {
        let mut state = OrchestrationState::new("goal", History::new());
        state.set_initial_plan(plan(&["a", "b"]));
        assert_eq!(state.replan_count(), 0);
        state.apply_replan(plan(&["b"]));
        assert_eq!(state.replan_count(), 1);
        state.finish_by_replan(TerminationReason::Finished, "done");
        assert_eq!(state.replan_count(), 2);
        assert!(state.is_terminal());
    }

    #[test]
    fn first_termination_wins() {
        let mut state = OrchestrationState::new("goal", History::new());
        state.terminate(TerminationReason::Cancelled, "cancelled");
        state.terminate(TerminationReason::Finished, "done");
        let response = state.final_response().expect("response");
        assert_eq!(response.reason, TerminationReason::Cancelled);
        assert_eq!(response.text, "cancelled");
    }
}
