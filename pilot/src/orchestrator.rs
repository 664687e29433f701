//! Plan → execute → replan state machine.
//!
//! One phase runs at a time. Each external call (screen capture, model call,
//! tool task) is a suspension point; the cancel token is checked before every
//! phase and again after every call returns, before its result is applied, so
//! a cancelled call never leaves the state half-updated.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::agents::executor::StepExecutor;
use crate::agents::planner::PlannerAgent;
use crate::agents::replanner::{ReplanContext, ReplannerAgent};
use crate::cancel::CancelToken;
use crate::core::budget::{ReplanBudget, TransitionCeiling, bounded_termination_message};
use crate::core::error::{PlanningFailed, StepCeilingExceeded, StructuredOutputError};
use crate::core::invariants::validate_invariants;
use crate::core::state::OrchestrationState;
use crate::core::types::{
    Action, FinalResponse, History, Phase, Plan, ScreenState, TerminationReason,
};
use crate::io::executor::{StructuredModel, ToolAgent};
use crate::io::run_log::{EventSink, PlanSource, RunEvent};
use crate::io::screen::{ScreenCapabilities, ScreenStateProvider};

/// Per-run inputs, passed once at run start.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub goal: String,
    pub replan_budget: ReplanBudget,
    pub step_ceiling: u32,
    pub seed_history: History,
}

/// Prompt settings shared by planner and replanner.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub prompt_budget_bytes: usize,
    pub hints: Vec<String>,
}

/// A run that reached `Terminated`.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: OrchestrationState,
    pub transitions: u32,
}

impl RunOutcome {
    pub fn response(&self) -> Option<&FinalResponse> {
        self.state.final_response()
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        self.response().map(|r| r.reason)
    }
}

/// Fatal outcomes. Distinct from every `Terminated` reason.
#[derive(Debug, Error)]
pub enum AbortKind {
    #[error(transparent)]
    StepCeiling(#[from] StepCeilingExceeded),
    #[error(transparent)]
    Planning(#[from] PlanningFailed),
}

/// A run that aborted, with the state as it stood at the abort.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct RunAborted {
    pub kind: AbortKind,
    pub state: Box<OrchestrationState>,
    pub transitions: u32,
}

struct Run {
    state: OrchestrationState,
    phase: Phase,
    ceiling: TransitionCeiling,
    budget: ReplanBudget,
    executed: usize,
}

impl Run {
    fn abort(self, kind: impl Into<AbortKind>) -> RunAborted {
        RunAborted {
            kind: kind.into(),
            transitions: self.ceiling.taken(),
            state: Box::new(self.state),
        }
    }
}

type Step = Result<Run, RunAborted>;

pub struct Orchestrator<'a, C, M: ?Sized, A: ?Sized> {
    screen: &'a ScreenStateProvider<C>,
    model: &'a M,
    agent: &'a A,
    planner: PlannerAgent,
    replanner: ReplannerAgent,
    executor: StepExecutor,
    cancel: CancelToken,
}

impl<'a, C, M, A> Orchestrator<'a, C, M, A>
where
    C: ScreenCapabilities,
    M: StructuredModel + ?Sized,
    A: ToolAgent + ?Sized,
{
    pub fn new(
        screen: &'a ScreenStateProvider<C>,
        model: &'a M,
        agent: &'a A,
        settings: AgentSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            screen,
            model,
            agent,
            planner: PlannerAgent::new(settings.prompt_budget_bytes, settings.hints.clone()),
            replanner: ReplannerAgent::new(settings.prompt_budget_bytes, settings.hints),
            executor: StepExecutor::new(),
            cancel,
        }
    }

    /// Drive one run to `Terminated`, or abort on the step ceiling or a
    /// planner double failure.
    #[instrument(skip_all, fields(max_replans = ?config.replan_budget.max(), step_ceiling = config.step_ceiling))]
    pub fn run(&self, config: RunConfig, sink: &mut dyn EventSink) -> Result<RunOutcome, RunAborted> {
        let RunConfig {
            goal,
            replan_budget,
            step_ceiling,
            seed_history,
        } = config;

        let run = Run {
            state: OrchestrationState::new(goal, seed_history),
            phase: Phase::Init,
            ceiling: TransitionCeiling::new(step_ceiling),
            budget: replan_budget,
            executed: 0,
        };
        sink.emit(&RunEvent::RunStarted {
            goal: run.state.goal().to_string(),
            max_replans: replan_budget.max(),
            step_ceiling,
            seeded_steps: run.state.seeded_steps(),
        });

        let result = self.drive(run, sink);
        match result {
            Ok(run) => Ok(self.finish(run, sink)),
            Err(aborted) => {
                sink.emit(&RunEvent::Aborted {
                    error: aborted.to_string(),
                });
                Err(aborted)
            }
        }
    }

    fn drive(&self, mut run: Run, sink: &mut dyn EventSink) -> Step {
        loop {
            if run.phase == Phase::Terminated {
                return Ok(run);
            }
            if self.cancel.is_cancelled() {
                run = self.cancelled(run, sink)?;
                continue;
            }
            run = match run.phase {
                Phase::Init => self.transition(run, Phase::Planning, sink, |_| {})?,
                Phase::Planning => self.plan(run, sink)?,
                Phase::Executing => self.execute(run, sink)?,
                Phase::Replanning => self.replan(run, sink)?,
                Phase::Terminated => run,
            };
        }
    }

    fn finish(&self, run: Run, sink: &mut dyn EventSink) -> RunOutcome {
        if let Some(response) = run.state.final_response() {
            info!(reason = response.reason.as_str(), replans = run.state.replan_count(), "run finished");
            sink.emit(&RunEvent::Terminated {
                reason: response.reason,
                response: response.text.clone(),
                replans: run.state.replan_count(),
                steps: run.state.completed_steps(),
            });
        }
        RunOutcome {
            transitions: run.ceiling.taken(),
            state: run.state,
        }
    }

    /// Count the transition, then apply `update` and enter `to` together.
    fn transition(
        &self,
        mut run: Run,
        to: Phase,
        sink: &mut dyn EventSink,
        update: impl FnOnce(&mut Run),
    ) -> Step {
        let transition = match run.ceiling.record() {
            Ok(n) => n,
            Err(err) => {
                warn!(err = %err, phase = %run.phase, "step ceiling exceeded");
                return Err(run.abort(err));
            }
        };
        update(&mut run);
        let from = run.phase;
        run.phase = to;
        sink.emit(&RunEvent::PhaseChanged {
            from,
            to,
            transition,
        });

        let violations = validate_invariants(&run.state, run.phase, run.executed);
        if !violations.is_empty() {
            warn!(violations = ?violations, "state invariant violated");
            debug_assert!(violations.is_empty(), "invariants: {violations:?}");
        }
        Ok(run)
    }

    fn cancelled(&self, run: Run, sink: &mut dyn EventSink) -> Step {
        let text = format!("Run cancelled during {}", run.phase);
        info!(phase = %run.phase, "cancellation observed");
        self.transition(run, Phase::Terminated, sink, move |run| {
            run.state.terminate(TerminationReason::Cancelled, text);
        })
    }

    fn capture(&self, phase: Phase, sink: &mut dyn EventSink) -> ScreenState {
        let screen = self.screen.capture();
        sink.emit(&RunEvent::ScreenCaptured {
            phase,
            locator_bytes: screen.locator.len(),
            has_vision: screen.vision.is_some(),
        });
        screen
    }

    fn plan(&self, run: Run, sink: &mut dyn EventSink) -> Step {
        let screen = self.capture(Phase::Planning, sink);
        if self.cancel.is_cancelled() {
            return self.cancelled(run, sink);
        }

        let grounded = self.planner.create_plan(
            self.model,
            run.state.goal(),
            run.state.history(),
            Some(&screen),
        );
        if self.cancel.is_cancelled() {
            return self.cancelled(run, sink);
        }

        let (plan, source) = match grounded {
            Ok(plan) => (plan, PlanSource::Planner),
            Err(grounded) => {
                sink.emit(&RunEvent::PlannerFallback {
                    error: grounded.to_string(),
                });
                let fallback =
                    self.planner
                        .create_plan(self.model, run.state.goal(), run.state.history(), None);
                if self.cancel.is_cancelled() {
                    return self.cancelled(run, sink);
                }
                match fallback {
                    Ok(plan) => (plan, PlanSource::PlannerFallback),
                    Err(fallback) => {
                        warn!(err = %fallback, "reduced-context planning failed");
                        return Err(run.abort(PlanningFailed { grounded, fallback }));
                    }
                }
            }
        };

        let steps = plan.steps.clone();
        let run = self.transition(run, Phase::Executing, sink, move |run| {
            run.state.set_initial_plan(plan);
        })?;
        sink.emit(&RunEvent::PlanSet { source, steps });
        Ok(run)
    }

    fn execute(&self, run: Run, sink: &mut dyn EventSink) -> Step {
        let Some(plan) = run.state.plan() else {
            // Unreachable while invariants hold; end the run rather than spin.
            return self.transition(run, Phase::Terminated, sink, |run| {
                run.state.terminate(TerminationReason::ReplanFailed, "No plan to execute");
            });
        };
        let record = self
            .executor
            .execute_step(self.agent, plan, run.state.history());
        if self.cancel.is_cancelled() {
            debug!(step = %record.step, "discarding step outcome after cancellation");
            return self.cancelled(run, sink);
        }

        let event = RunEvent::StepCompleted {
            index: run.state.completed_steps() + 1,
            step: record.step.clone(),
            outcome: record.outcome.clone(),
            failed: record.is_failure(),
        };
        let run = self.transition(run, Phase::Replanning, sink, move |run| {
            run.state.record_step(record);
            run.executed += 1;
        })?;
        sink.emit(&event);
        Ok(run)
    }

    fn replan(&self, run: Run, sink: &mut dyn EventSink) -> Step {
        if run.budget.exhausted(run.state.replan_count()) {
            // No model call is spent on a decision that cannot be applied.
            let max = run.budget.max().unwrap_or_default();
            let text = bounded_termination_message(max, run.state.completed_steps());
            info!(max_replans = max, "replan budget exhausted");
            return self.transition(run, Phase::Terminated, sink, move |run| {
                run.state
                    .finish_by_replan(TerminationReason::BoundExceeded, text);
            });
        }

        let screen = self.capture(Phase::Replanning, sink);
        if self.cancel.is_cancelled() {
            return self.cancelled(run, sink);
        }

        let decision = match run.state.plan() {
            Some(plan) => self.replanner.replan(
                self.model,
                &ReplanContext {
                    goal: run.state.goal(),
                    plan,
                    history: run.state.history(),
                    screen: &screen,
                    replan_count: run.state.replan_count(),
                    max_replans: run.budget.max(),
                },
            ),
            None => Err(StructuredOutputError::EmptyPlan { role: "replanner" }),
        };
        if self.cancel.is_cancelled() {
            return self.cancelled(run, sink);
        }

        match decision {
            Ok(Action::Continue { steps }) => match Plan::new(steps) {
                Some(plan) => {
                    let steps = plan.steps.clone();
                    let run = self.transition(run, Phase::Executing, sink, move |run| {
                        run.state.apply_replan(plan);
                    })?;
                    sink.emit(&RunEvent::PlanSet {
                        source: PlanSource::Replanner,
                        steps,
                    });
                    Ok(run)
                }
                None => self.replan_failed(run, sink, "replanner returned no usable steps"),
            },
            Ok(Action::Finish { response }) => {
                self.transition(run, Phase::Terminated, sink, move |run| {
                    run.state.finish_by_replan(TerminationReason::Finished, response);
                })
            }
            Err(err) => {
                warn!(err = %err, "replanner failed, terminating run");
                self.replan_failed(run, sink, &err.to_string())
            }
        }
    }

    fn replan_failed(&self, run: Run, sink: &mut dyn EventSink, message: &str) -> Step {
        let text = format!("error occurred: {message}");
        self.transition(run, Phase::Terminated, sink, move |run| {
            run.state.finish_by_replan(TerminationReason::ReplanFailed, text);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepRecord;
    use crate::test_support::{RecordingSink, ScriptedAgent, ScriptedModel, ScriptedScreen};
    use serde_json::json;

    fn config(max_replans: Option<u32>) -> RunConfig {
        RunConfig {
            goal: "turn on wifi".to_string(),
            replan_budget: ReplanBudget::from_option(max_replans),
            step_ceiling: 50,
            seed_history: History::new(),
        }
    }

    fn settings() -> AgentSettings {
        AgentSettings {
            prompt_budget_bytes: 20_000,
            hints: Vec::new(),
        }
    }

    #[test]
    fn single_step_run_finishes() {
        let screen = ScreenStateProvider::new(ScriptedScreen::new("<node/>", None));
        let model = ScriptedModel::new([
            Ok(json!({"steps": ["open settings"]})),
            Ok(json!({"action": "finish", "steps": [], "response": "Wi-Fi is on"})),
        ]);
        let agent = ScriptedAgent::new([Ok("opened".to_string())]);
        let mut sink = RecordingSink::default();

        let outcome = Orchestrator::new(&screen, &model, &agent, settings(), CancelToken::new())
            .run(config(Some(5)), &mut sink)
            .expect("run");

        assert_eq!(outcome.reason(), Some(TerminationReason::Finished));
        assert_eq!(outcome.response().map(|r| r.text.as_str()), Some("Wi-Fi is on"));
        assert_eq!(
            outcome.state.history().records(),
            &[StepRecord::new("open settings", "opened")]
        );
        assert_eq!(outcome.state.replan_count(), 1);
        // init→planning→executing→replanning→terminated
        assert_eq!(outcome.transitions, 4);
        assert_eq!(sink.phases(), vec![
            Phase::Planning,
            Phase::Executing,
            Phase::Replanning,
            Phase::Terminated,
        ]);
        assert!(matches!(sink.events.last(), Some(RunEvent::Terminated { .. })));
    }

    #[test]
    fn replanner_failure_terminates_with_error_text() {
        let screen = ScreenStateProvider::new(ScriptedScreen::new("", None));
        let model = ScriptedModel::new([
            Ok(json!({"steps": ["step a"]})),
            Err("connection reset".to_string()),
        ]);
        let agent = ScriptedAgent::new([Ok("ok".to_string())]);
        let outcome = Orchestrator::new(&screen, &model, &agent, settings(), CancelToken::new())
            .run(config(Some(5)), &mut RecordingSink::default())
            .expect("run");

        let response = outcome.response().expect("response");
        assert_eq!(response.reason, TerminationReason::ReplanFailed);
        assert!(response.text.starts_with("error occurred: "));
        assert!(response.text.contains("connection reset"));
        assert_eq!(outcome.state.replan_count(), 1);
    }

    #[test]
    fn zero_bound_skips_the_replanner() {
        let screen = ScreenStateProvider::new(ScriptedScreen::new("", None));
        let model = ScriptedModel::new([Ok(json!({"steps": ["a", "b"]}))]);
        let agent = ScriptedAgent::new([Ok("done a".to_string())]);
        let outcome = Orchestrator::new(&screen, &model, &agent, settings(), CancelToken::new())
            .run(config(Some(0)), &mut RecordingSink::default())
            .expect("run");

        assert_eq!(outcome.reason(), Some(TerminationReason::BoundExceeded));
        assert_eq!(model.calls().len(), 1);
        assert!(outcome.response().expect("response").text.contains("maximum of 0 replans"));
    }

    #[test]
    fn step_ceiling_aborts() {
        let screen = ScreenStateProvider::new(ScriptedScreen::new("", None));
        let model = ScriptedModel::repeating(
            json!({"steps": ["a"]}),
            json!({"action": "continue", "steps": ["a"], "response": ""}),
        );
        let agent = ScriptedAgent::repeating("ok");
        let mut cfg = config(None);
        cfg.step_ceiling = 6;
        let aborted = Orchestrator::new(&screen, &model, &agent, settings(), CancelToken::new())
            .run(cfg, &mut RecordingSink::default())
            .unwrap_err();

        assert!(matches!(
            aborted.kind,
            AbortKind::StepCeiling(StepCeilingExceeded {
                ceiling: 6,
                transitions: 7
            })
        ));
        assert!(aborted.state.final_response().is_none());
    }
}
