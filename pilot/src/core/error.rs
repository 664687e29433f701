//! Error kinds surfaced by the orchestration loop.
//!
//! Only [`StepCeilingExceeded`] and [`PlanningFailed`] abort a run. The other
//! kinds are absorbed into history entries or the final response by the
//! component that observes them.

use thiserror::Error;

/// Screenshot or locator capability failed, or the screenshot could not be
/// normalized. Always degraded to partial grounding.
#[derive(Debug, Error)]
pub enum ScreenCaptureError {
    #[error("screenshot capability failed: {0}")]
    Screenshot(String),
    #[error("locator capability failed: {0}")]
    Locator(String),
    #[error("screenshot is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("screenshot image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

/// A planner or replanner model call failed or returned output that does not
/// match the expected schema.
#[derive(Debug, Error)]
pub enum StructuredOutputError {
    #[error("{role} model call failed: {message}")]
    Call { role: &'static str, message: String },
    #[error("{role} output violates schema: {}", .violations.join("; "))]
    Schema {
        role: &'static str,
        violations: Vec<String>,
    },
    #[error("{role} output could not be parsed: {message}")]
    Parse { role: &'static str, message: String },
    #[error("{role} returned no usable steps")]
    EmptyPlan { role: &'static str },
}

/// A step's tool-using agent call failed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ToolExecutionError {
    pub message: String,
}

/// The global transition ceiling was hit. Signals a runaway loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("aborted: {transitions} transitions exceeded the step ceiling of {ceiling}")]
pub struct StepCeilingExceeded {
    pub ceiling: u32,
    pub transitions: u32,
}

/// The planner failed with screen grounding and again without it.
#[derive(Debug, Error)]
#[error("planning failed: {grounded}; reduced-context retry failed: {fallback}")]
pub struct PlanningFailed {
    pub grounded: StructuredOutputError,
    pub fallback: StructuredOutputError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_lists_violations() {
        let err = StructuredOutputError::Schema {
            role: "planner",
            violations: vec!["missing steps".to_string(), "extra field".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "planner output violates schema: missing steps; extra field"
        );
    }

    #[test]
    fn ceiling_error_is_downcastable_from_anyhow() {
        let err = anyhow::Error::new(StepCeilingExceeded {
            ceiling: 5,
            transitions: 6,
        });
        let ceiling = err
            .downcast_ref::<StepCeilingExceeded>()
            .expect("downcast");
        assert_eq!(ceiling.ceiling, 5);
    }
}
