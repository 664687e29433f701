//! Scripted collaborators for tests: screen, model, tool agent and event sink.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::Cursor;

use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::core::types::Phase;
use crate::io::executor::{ModelRequest, StructuredModel, ToolAgent};
use crate::io::run_log::{EventSink, RunEvent};
use crate::io::screen::ScreenCapabilities;

/// Base64 PNG of the given size with an alpha channel.
pub fn png_base64(width: u32, height: u32) -> String {
    let image = RgbaImage::from_pixel(width, height, Rgba([30, 144, 255, 200]));
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png fixture");
    STANDARD.encode(buf.into_inner())
}

/// Screen with a fixed locator dump and optional screenshot.
#[derive(Debug)]
pub struct ScriptedScreen {
    locator: String,
    screenshot: Option<String>,
    captures: Cell<u32>,
}

impl ScriptedScreen {
    pub fn new(locator: &str, screenshot: Option<String>) -> Self {
        Self {
            locator: locator.to_string(),
            screenshot,
            captures: Cell::new(0),
        }
    }

    /// Number of screenshot requests served.
    pub fn captures(&self) -> u32 {
        self.captures.get()
    }
}

impl ScreenCapabilities for ScriptedScreen {
    fn screenshot(&self) -> Result<Option<String>> {
        self.captures.set(self.captures.get() + 1);
        Ok(self.screenshot.clone())
    }

    fn locators(&self) -> Result<String> {
        Ok(self.locator.clone())
    }
}

/// What a [`ScriptedModel`] was asked.
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub role: &'static str,
    pub prompt: String,
    pub had_image: bool,
}

/// Model returning queued outputs in order. `Err` entries become call errors.
///
/// When the queue is empty it falls back to the repeat outputs, if any, else
/// fails the call.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    outputs: RefCell<VecDeque<Result<Value, String>>>,
    repeat_planner: Option<Value>,
    repeat_replanner: Option<Value>,
    calls: RefCell<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn new(outputs: impl IntoIterator<Item = Result<Value, String>>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Answers every planner call with `plan` and every replanner call with
    /// `action`.
    pub fn repeating(plan: Value, action: Value) -> Self {
        Self {
            repeat_planner: Some(plan),
            repeat_replanner: Some(action),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.borrow().clone()
    }

    pub fn calls_for(&self, role: &str) -> Vec<ModelCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.role == role)
            .cloned()
            .collect()
    }
}

impl StructuredModel for ScriptedModel {
    fn generate(&self, request: &ModelRequest<'_>) -> Result<Value> {
        self.calls.borrow_mut().push(ModelCall {
            role: request.role,
            prompt: request.prompt.clone(),
            had_image: request.image.is_some(),
        });
        if let Some(next) = self.outputs.borrow_mut().pop_front() {
            return next.map_err(|message| anyhow!(message));
        }
        let repeat = match request.role {
            "planner" => self.repeat_planner.clone(),
            _ => self.repeat_replanner.clone(),
        };
        repeat.ok_or_else(|| anyhow!("scripted model exhausted"))
    }
}

/// Tool agent returning queued outcomes and recording every task.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    outcomes: RefCell<VecDeque<Result<String, String>>>,
    repeat: Option<String>,
    tasks: RefCell<Vec<String>>,
    cancel_after: Option<(usize, CancelToken)>,
}

impl ScriptedAgent {
    pub fn new(outcomes: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn repeating(outcome: &str) -> Self {
        Self {
            repeat: Some(outcome.to_string()),
            ..Self::default()
        }
    }

    /// Set `token` while serving call number `calls` (1-based), simulating an
    /// interrupt that arrives mid-step.
    pub fn cancel_during(mut self, calls: usize, token: CancelToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn tasks(&self) -> Vec<String> {
        self.tasks.borrow().clone()
    }
}

impl ToolAgent for ScriptedAgent {
    fn run_task(&self, task: &str) -> Result<String> {
        self.tasks.borrow_mut().push(task.to_string());
        if let Some((calls, token)) = &self.cancel_after
            && self.tasks.borrow().len() == *calls
        {
            token.cancel();
        }
        match self.outcomes.borrow_mut().pop_front() {
            Some(outcome) => outcome.map_err(|message| anyhow!(message)),
            None => self
                .repeat
                .clone()
                .ok_or_else(|| anyhow!("scripted agent exhausted")),
        }
    }
}

/// Sink keeping every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<RunEvent>,
}

impl RecordingSink {
    /// Target phases of every recorded transition, in order.
    pub fn phases(&self) -> Vec<Phase> {
        self.events
            .iter()
            .filter_map(|event| match event {
                RunEvent::PhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }

    pub fn steps_completed(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, RunEvent::StepCompleted { .. }))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &RunEvent) {
        self.events.push(event.clone());
    }
}
