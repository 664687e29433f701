//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the planner, executor,
//! replanner and orchestrator. They carry no I/O handles and serialize to the
//! same JSON shapes the structured-output schemas describe.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered list of remaining steps toward the goal.
///
/// A plan is only ever replaced wholesale. Construction through
/// [`Plan::new`] rejects empty step lists so the executor always has a first
/// step to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<String>,
}

impl Plan {
    /// Build a plan from raw step strings, trimming whitespace and dropping
    /// blank entries. Returns `None` if nothing usable remains.
    pub fn new<I, S>(steps: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps: Vec<String> = steps
            .into_iter()
            .map(Into::into)
            .map(|step| step.trim().to_string())
            .filter(|step| !step.is_empty())
            .collect();
        if steps.is_empty() {
            return None;
        }
        Some(Self { steps })
    }

    pub fn first(&self) -> Option<&str> {
        self.steps.first().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render as a 1-indexed numbered list, one step per line.
    pub fn numbered(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {}", i + 1, step))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One executed step and the text the agent returned for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub outcome: String,
}

impl StepRecord {
    pub fn new(step: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            outcome: outcome.into(),
        }
    }

    /// Record a failed step using the `Error: <message>` outcome convention.
    pub fn failed(step: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            step: step.into(),
            outcome: format!("{ERROR_OUTCOME_PREFIX}{message}"),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.starts_with(ERROR_OUTCOME_PREFIX)
    }
}

/// Outcome prefix marking a step whose agent call failed.
pub const ERROR_OUTCOME_PREFIX: &str = "Error: ";

/// Append-only execution history.
///
/// There is deliberately no API to remove, reorder or edit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    records: Vec<StepRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(records: Vec<StepRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StepRecord> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a StepRecord;
    type IntoIter = std::slice::Iter<'a, StepRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Normalized screenshot ready for a vision-capable model.
#[derive(Clone, PartialEq, Eq)]
pub struct VisionPayload {
    /// JPEG-encoded image bytes.
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// `data:image/jpeg;base64,...` URI for the same bytes.
    pub data_uri: String,
}

impl fmt::Debug for VisionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisionPayload")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("jpeg_bytes", &self.jpeg.len())
            .finish()
    }
}

/// Screen grounding for one planner or replanner call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenState {
    /// Structural locator dump. Empty when the dump could not be taken.
    pub locator: String,
    pub vision: Option<VisionPayload>,
}

impl ScreenState {
    pub fn locator(&self) -> Option<&str> {
        let trimmed = self.locator.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    pub fn vision(&self) -> Option<&VisionPayload> {
        self.vision.as_ref()
    }
}

/// Replanner decision.
///
/// Serialized as `{"action": "continue", "steps": [...]}` or
/// `{"action": "finish", "response": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Continue { steps: Vec<String> },
    Finish { response: String },
}

/// Orchestrator phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Planning,
    Executing,
    Replanning,
    Terminated,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::Replanning => "replanning",
            Phase::Terminated => "terminated",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run reached `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The replanner declared the goal satisfied.
    Finished,
    /// The replan budget was exhausted.
    BoundExceeded,
    /// The replanner call failed or returned unusable output.
    ReplanFailed,
    /// The run was cancelled at a suspension point.
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Finished => "finished",
            TerminationReason::BoundExceeded => "bound_exceeded",
            TerminationReason::ReplanFailed => "replan_failed",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

/// Response attached to a terminated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub reason: TerminationReason,
    pub text: String,
}
