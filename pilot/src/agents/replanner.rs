//! Replanner: decides whether to continue with a revised plan or finish.

use tracing::{debug, instrument};

use crate::core::error::StructuredOutputError;
use crate::core::types::{Action, History, Plan, ScreenState};
use crate::io::executor::StructuredModel;
use crate::io::prompt::{PromptBuilder, ReplannerInputs};

use super::{OutputSchema, call_structured};

const ROLE: &str = "replanner";

/// Everything the replanner sees for one decision.
#[derive(Debug, Clone, Copy)]
pub struct ReplanContext<'a> {
    pub goal: &'a str,
    pub plan: &'a Plan,
    pub history: &'a History,
    pub screen: &'a ScreenState,
    pub replan_count: u32,
    /// Shown to the model for context only; the bound is enforced by the caller.
    pub max_replans: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ReplannerAgent {
    prompts: PromptBuilder,
    hints: Vec<String>,
}

impl ReplannerAgent {
    pub fn new(prompt_budget_bytes: usize, hints: Vec<String>) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
            hints,
        }
    }

    /// Returns `Continue` with at least one non-blank step, or `Finish`.
    #[instrument(skip_all, fields(replan_count = ctx.replan_count))]
    pub fn replan<M: StructuredModel + ?Sized>(
        &self,
        model: &M,
        ctx: &ReplanContext<'_>,
    ) -> Result<Action, StructuredOutputError> {
        let image = ctx.screen.vision();
        let prompt = self
            .prompts
            .build_replanner(&ReplannerInputs {
                goal: ctx.goal,
                hints: &self.hints,
                plan: ctx.plan,
                history: ctx.history,
                locator: ctx.screen.locator(),
                has_image: image.is_some(),
                replan_count: ctx.replan_count,
                max_replans: ctx.max_replans,
            })
            .map_err(|err| StructuredOutputError::Call {
                role: ROLE,
                message: format!("render prompt: {err:#}"),
            })?;

        let action: Action = call_structured(model, ROLE, OutputSchema::Action, prompt, image)?;
        let action = match action {
            Action::Continue { steps } => {
                let plan = Plan::new(steps).ok_or(StructuredOutputError::EmptyPlan { role: ROLE })?;
                debug!(steps = plan.len(), "replanner continues");
                Action::Continue { steps: plan.steps }
            }
            Action::Finish { response } => {
                debug!("replanner finishes");
                Action::Finish { response }
            }
        };
        Ok(action)
    }
}
