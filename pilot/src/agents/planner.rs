//! Planner: produces the initial plan for a goal.

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::error::StructuredOutputError;
use crate::core::types::{History, Plan, ScreenState};
use crate::io::executor::StructuredModel;
use crate::io::prompt::{PlannerInputs, PromptBuilder};

use super::{OutputSchema, call_structured};

const ROLE: &str = "planner";

#[derive(Debug, Deserialize)]
struct PlanOutput {
    steps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlannerAgent {
    prompts: PromptBuilder,
    hints: Vec<String>,
}

impl PlannerAgent {
    pub fn new(prompt_budget_bytes: usize, hints: Vec<String>) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
            hints,
        }
    }

    /// Ask the model for a plan. `screen` is `None` for the reduced-context
    /// retry, which omits both the locator dump and the screenshot.
    #[instrument(skip_all, fields(grounded = screen.is_some()))]
    pub fn create_plan<M: StructuredModel + ?Sized>(
        &self,
        model: &M,
        goal: &str,
        history: &History,
        screen: Option<&ScreenState>,
    ) -> Result<Plan, StructuredOutputError> {
        let image = screen.and_then(ScreenState::vision);
        let prompt = self
            .prompts
            .build_planner(&PlannerInputs {
                goal,
                hints: &self.hints,
                history,
                locator: screen.and_then(ScreenState::locator),
                has_image: image.is_some(),
            })
            .map_err(|err| StructuredOutputError::Call {
                role: ROLE,
                message: format!("render prompt: {err:#}"),
            })?;

        let output: PlanOutput = call_structured(model, ROLE, OutputSchema::Plan, prompt, image)?;
        let plan = Plan::new(output.steps).ok_or(StructuredOutputError::EmptyPlan { role: ROLE })?;
        debug!(steps = plan.len(), "plan created");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, png_base64};
    use crate::core::vision::normalize_screenshot;
    use serde_json::json;

    fn screen_with_image() -> ScreenState {
        ScreenState {
            locator: "<node text='Search'/>".to_string(),
            vision: Some(normalize_screenshot(&png_base64(4, 4), 80).expect("vision")),
        }
    }

    #[test]
    fn grounded_call_attaches_screen() {
        let model = ScriptedModel::new([Ok(json!({"steps": ["tap search", "type cats"]}))]);
        let planner = PlannerAgent::new(10_000, Vec::new());
        let plan = planner
            .create_plan(&model, "search cats", &History::new(), Some(&screen_with_image()))
            .expect("plan");
        assert_eq!(plan.steps, vec!["tap search", "type cats"]);

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].role, "planner");
        assert!(calls[0].had_image);
        assert!(calls[0].prompt.contains("<node text='Search'/>"));
    }

    #[test]
    fn reduced_context_call_omits_screen() {
        let model = ScriptedModel::new([Ok(json!({"steps": ["open app"]}))]);
        let planner = PlannerAgent::new(10_000, vec!["Enter is the arrow key".to_string()]);
        planner
            .create_plan(&model, "open app", &History::new(), None)
            .expect("plan");
        let calls = model.calls();
        assert!(!calls[0].had_image);
        assert!(!calls[0].prompt.contains("Locator"));
        assert!(calls[0].prompt.contains("Enter is the arrow key"));
    }

    #[test]
    fn blank_steps_are_an_empty_plan() {
        let model = ScriptedModel::new([Ok(json!({"steps": ["   "]}))]);
        let err = PlannerAgent::new(10_000, Vec::new())
            .create_plan(&model, "goal", &History::new(), None)
            .unwrap_err();
        assert!(matches!(err, StructuredOutputError::EmptyPlan { role: "planner" }));
    }

    #[test]
    fn backend_failure_is_a_call_error() {
        let model = ScriptedModel::new([Err("rate limited".to_string())]);
        let err = PlannerAgent::new(10_000, Vec::new())
            .create_plan(&model, "goal", &History::new(), None)
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }
}
