//! Executor: performs the first step of the current plan.

use tracing::{instrument, warn};

use crate::core::error::ToolExecutionError;
use crate::core::types::{History, Plan, StepRecord};
use crate::io::executor::ToolAgent;
use crate::io::prompt::executor_task;

#[derive(Debug, Clone, Copy, Default)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute step 1 of `plan` and record the outcome.
    ///
    /// Never fails: agent errors become an `"Error: <message>"` outcome so the
    /// replanner can react to them. `history` is accepted for parity with the
    /// loop's view of the run; the task text carries only the plan.
    #[instrument(skip_all, fields(history_len = history.len()))]
    pub fn execute_step<A: ToolAgent + ?Sized>(
        &self,
        agent: &A,
        plan: &Plan,
        history: &History,
    ) -> StepRecord {
        let Some(step) = plan.first() else {
            return StepRecord::failed("error", "Plan is empty");
        };

        let outcome = executor_task(plan, step)
            .and_then(|task| agent.run_task(&task))
            .map_err(|err| ToolExecutionError {
                message: format!("{err:#}"),
            });

        match outcome {
            Ok(text) => StepRecord::new(step, text),
            Err(err) => {
                warn!(step, err = %err, "step failed");
                StepRecord::failed(step, err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAgent;

    #[test]
    fn records_only_the_first_step() {
        let agent = ScriptedAgent::new([Ok("tapped Settings".to_string())]);
        let plan = Plan::new(["open settings", "tap wifi"]).expect("plan");
        let record = StepExecutor::new().execute_step(&agent, &plan, &History::new());
        assert_eq!(record, StepRecord::new("open settings", "tapped Settings"));

        let tasks = agent.tasks();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].contains("1. open settings\n2. tap wifi"));
        assert!(tasks[0].contains("executing step 1: open settings."));
    }

    #[test]
    fn agent_errors_become_outcomes() {
        let agent = ScriptedAgent::new([Err("element not found".to_string())]);
        let plan = Plan::new(["tap wifi"]).expect("plan");
        let record = StepExecutor::new().execute_step(&agent, &plan, &History::new());
        assert_eq!(record.step, "tap wifi");
        assert_eq!(record.outcome, "Error: element not found");
        assert!(record.is_failure());
    }
}
