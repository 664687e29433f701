//! Run events and their sinks.
//!
//! Every phase transition and step outcome is reported as a [`RunEvent`].
//! [`RunLog`] persists them as `events.jsonl` under `<run_dir>/<run_id>/`
//! alongside a final `summary.json` and mirrors each one to `tracing`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::state::OrchestrationState;
use crate::core::types::{Phase, TerminationReason};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        goal: String,
        max_replans: Option<u32>,
        step_ceiling: u32,
        seeded_steps: usize,
    },
    PhaseChanged {
        from: Phase,
        to: Phase,
        transition: u32,
    },
    ScreenCaptured {
        phase: Phase,
        locator_bytes: usize,
        has_vision: bool,
    },
    PlannerFallback {
        error: String,
    },
    PlanSet {
        source: PlanSource,
        steps: Vec<String>,
    },
    StepCompleted {
        index: usize,
        step: String,
        outcome: String,
        failed: bool,
    },
    Terminated {
        reason: TerminationReason,
        response: String,
        replans: u32,
        steps: usize,
    },
    Aborted {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Planner,
    PlannerFallback,
    Replanner,
}

/// Receives run events in order.
pub trait EventSink {
    fn emit(&mut self, event: &RunEvent);
}

fn trace_event(event: &RunEvent) {
    match event {
        RunEvent::RunStarted { goal, .. } => info!(goal = %goal, "run started"),
        RunEvent::PhaseChanged {
            from,
            to,
            transition,
        } => debug!(%from, %to, transition, "phase changed"),
        RunEvent::ScreenCaptured {
            phase,
            locator_bytes,
            has_vision,
        } => debug!(%phase, locator_bytes, has_vision, "screen captured"),
        RunEvent::PlannerFallback { error } => {
            warn!(err = %error, "grounded planning failed, retrying without screen state");
        }
        RunEvent::PlanSet { source, steps } => {
            info!(?source, steps = steps.len(), "plan set");
        }
        RunEvent::StepCompleted {
            index,
            step,
            failed,
            ..
        } => info!(index, step = %step, failed, "step completed"),
        RunEvent::Terminated {
            reason,
            replans,
            steps,
            ..
        } => info!(reason = reason.as_str(), replans, steps, "run terminated"),
        RunEvent::Aborted { error } => warn!(err = %error, "run aborted"),
    }
}

#[derive(Serialize)]
struct EventLine<'a> {
    ts_ms: u64,
    #[serde(flatten)]
    event: &'a RunEvent,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    goal: &'a str,
    reason: Option<TerminationReason>,
    response: Option<&'a str>,
    error: Option<&'a str>,
    replans: u32,
    transitions: u32,
    duration_ms: u64,
    state: &'a OrchestrationState,
}

/// Event sink persisting a run's artifacts to disk.
///
/// Write failures are logged and do not interrupt the run.
#[derive(Debug)]
pub struct RunLog {
    run_id: String,
    dir: PathBuf,
    events: Option<File>,
    started: Instant,
}

impl RunLog {
    pub fn create(run_dir: &Path, run_id: &str) -> Result<Self> {
        let dir = run_dir.join(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        let events_path = dir.join("events.jsonl");
        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)
            .with_context(|| format!("open {}", events_path.display()))?;
        info!(run_id, dir = %dir.display(), "run log created");
        Ok(Self {
            run_id: run_id.to_string(),
            dir,
            events: Some(events),
            started: Instant::now(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `summary.json`. `error` is set for aborted runs.
    pub fn write_summary(
        &self,
        state: &OrchestrationState,
        transitions: u32,
        error: Option<&str>,
    ) -> Result<PathBuf> {
        let final_response = state.final_response();
        let summary = RunSummary {
            run_id: &self.run_id,
            goal: state.goal(),
            reason: final_response.map(|r| r.reason),
            response: final_response.map(|r| r.text.as_str()),
            error,
            replans: state.replan_count(),
            transitions,
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            state,
        };
        let path = self.dir.join("summary.json");
        let mut buf = serde_json::to_string_pretty(&summary).context("serialize run summary")?;
        buf.push('\n');
        fs::write(&path, buf).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    fn append(&mut self, event: &RunEvent) -> Result<()> {
        let Some(file) = self.events.as_mut() else {
            return Ok(());
        };
        let line = EventLine {
            ts_ms: unix_millis(),
            event,
        };
        let mut buf = serde_json::to_string(&line).context("serialize run event")?;
        buf.push('\n');
        file.write_all(buf.as_bytes()).context("append run event")?;
        Ok(())
    }
}

impl EventSink for RunLog {
    fn emit(&mut self, event: &RunEvent) {
        trace_event(event);
        if let Err(err) = self.append(event) {
            warn!(err = %format!("{err:#}"), "event log disabled after write failure");
            self.events = None;
        }
    }
}

/// New run identifier, unique per process start.
pub fn new_run_id() -> String {
    format!("run-{}-{}", unix_millis(), std::process::id())
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
