//! Prompt builder for planner, replanner and executor calls.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::{debug, warn};

use crate::core::types::{History, Plan};

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const REPLANNER_TEMPLATE: &str = include_str!("prompts/replanner.md");
const EXECUTOR_TEMPLATE: &str = include_str!("prompts/executor.md");

const HINTS: &str = "hints";
const HISTORY: &str = "history";
const LOCATOR: &str = "locator";

/// History is kept unless dropping it is the only way to give the locator
/// dump at least this many bytes.
const MIN_LOCATOR_BYTES: usize = 4_000;

const TRUNCATION_MARKER: &str = "\n[truncated]";

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("planner", PLANNER_TEMPLATE)
        .expect("planner template should be valid");
    env.add_template("replanner", REPLANNER_TEMPLATE)
        .expect("replanner template should be valid");
    env.add_template("executor", EXECUTOR_TEMPLATE)
        .expect("executor template should be valid");
    env
});

static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex should be valid")
});

/// Inputs for the first plan of a run.
#[derive(Debug, Clone, Copy)]
pub struct PlannerInputs<'a> {
    pub goal: &'a str,
    pub hints: &'a [String],
    /// Seed history (setup steps) known before planning.
    pub history: &'a History,
    pub locator: Option<&'a str>,
    pub has_image: bool,
}

/// Inputs for a replanner decision.
#[derive(Debug, Clone, Copy)]
pub struct ReplannerInputs<'a> {
    pub goal: &'a str,
    pub hints: &'a [String],
    pub plan: &'a Plan,
    pub history: &'a History,
    pub locator: Option<&'a str>,
    pub has_image: bool,
    pub replan_count: u32,
    pub max_replans: Option<u32>,
}

/// Renders prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_planner(&self, input: &PlannerInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("planner")?.render(context! {
            goal => input.goal.trim(),
            hints => non_blank(input.hints),
            history => input.history.records(),
            locator => input.locator.map(str::trim).filter(|s| !s.is_empty()),
            has_image => input.has_image,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn build_replanner(&self, input: &ReplannerInputs<'_>) -> Result<String> {
        let rendered = ENGINE.get_template("replanner")?.render(context! {
            goal => input.goal.trim(),
            hints => non_blank(input.hints),
            plan => input.plan.numbered(),
            history => input.history.records(),
            locator => input.locator.map(str::trim).filter(|s| !s.is_empty()),
            has_image => input.has_image,
            replan_count => input.replan_count,
            max_replans => input.max_replans,
        })?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}

/// Task text handed to the tool agent for the first step of `plan`.
pub fn executor_task(plan: &Plan, task: &str) -> Result<String> {
    let rendered = ENGINE.get_template("executor")?.render(context! {
        plan => plan.numbered(),
        task => task,
    })?;
    Ok(rendered)
}

fn non_blank(items: &[String]) -> Vec<&str> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Parse sections from rendered template output.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(matches.len());

    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let required = kind.as_str() == "required";
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());

        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Fit sections into `budget` bytes.
///
/// Hints go first. The locator dump is never removed: it is cut down to the
/// room left by the other sections, and history is dropped only when that
/// room would fall below [`MIN_LOCATOR_BYTES`]. If required sections alone
/// are still over budget, the longest section is truncated.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    if total_len(sections) <= budget {
        return;
    }
    drop_section(sections, HINTS, budget);

    if let Some(idx) = sections.iter().position(|s| s.key == LOCATOR) {
        if locator_room(sections, idx, budget) < MIN_LOCATOR_BYTES {
            drop_section(sections, HISTORY, budget);
        }
        if let Some(idx) = sections.iter().position(|s| s.key == LOCATOR) {
            let room = locator_room(sections, idx, budget);
            let locator = &mut sections[idx];
            let before_len = locator.content.len();
            if before_len > room {
                truncate_at_char_boundary(
                    &mut locator.content,
                    room.saturating_sub(TRUNCATION_MARKER.len()),
                );
                locator.content.push_str(TRUNCATION_MARKER);
                warn!(
                    before_len,
                    after_len = locator.content.len(),
                    budget,
                    "locator dump truncated to fit prompt budget"
                );
            }
        }
    } else {
        drop_section(sections, HISTORY, budget);
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(longest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let before_len = longest.content.len();
    let excess = total - budget;
    let allowed = before_len.saturating_sub(excess + TRUNCATION_MARKER.len());
    truncate_at_char_boundary(&mut longest.content, allowed);
    longest.content.push_str(TRUNCATION_MARKER);
    warn!(
        section = %longest.key,
        before_len,
        after_len = longest.content.len(),
        "truncated section for budget"
    );
}

/// Remove the droppable section `key` if the prompt is over `budget`.
fn drop_section(sections: &mut Vec<ParsedSection>, key: &str, budget: usize) {
    if total_len(sections) <= budget {
        return;
    }
    if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
        debug!(
            section = key,
            bytes_dropped = sections[idx].content.len(),
            "dropped section for budget"
        );
        sections.remove(idx);
    }
}

/// Bytes left for the section at `idx` once every other section is counted.
fn locator_room(sections: &[ParsedSection], idx: usize, budget: usize) -> usize {
    let others = total_len(sections) - sections[idx].content.len();
    budget.saturating_sub(others)
}

fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
