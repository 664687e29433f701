//! Investigation tests against a real `codex exec` backend.
//!
//! These check that the plan and action schemas are accepted by the Codex CLI
//! `--output-schema` flag and that its answers parse into pilot types. They
//! need the CLI on PATH with working credentials, so they are ignored by
//! default.
//!
//! Run with: `cargo test -p pilot --test investigation_llm -- --ignored`

use std::process::Command;

use pilot::agents::planner::PlannerAgent;
use pilot::agents::replanner::{ReplanContext, ReplannerAgent};
use pilot::cancel::CancelToken;
use pilot::core::types::{Action, History, Plan, ScreenState, StepRecord};
use pilot::io::config::AgentConfig;
use pilot::io::executor::{CodexExec, ToolAgent};

const LOCATOR: &str = r#"<hierarchy><node class="android.widget.Button" text="Settings" bounds="[0,0][200,80]"/></hierarchy>"#;

fn backend(artifacts: &std::path::Path) -> CodexExec {
    let workdir = std::env::current_dir().expect("cwd");
    CodexExec::new(
        AgentConfig::default(),
        workdir,
        artifacts,
        CancelToken::new(),
    )
}

#[test]
#[ignore]
fn codex_cli_available() {
    let output = Command::new("codex")
        .arg("--version")
        .output()
        .expect("codex not in PATH");
    assert!(
        output.status.success(),
        "codex --version failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    println!("Codex CLI version: {}", String::from_utf8_lossy(&output.stdout).trim());
}

#[test]
#[ignore]
fn planner_schema_round_trips_through_codex() {
    let temp = tempfile::tempdir().expect("tempdir");
    let codex = backend(temp.path());
    let screen = ScreenState {
        locator: LOCATOR.to_string(),
        vision: None,
    };

    let plan = PlannerAgent::new(60_000, Vec::new())
        .create_plan(&codex, "open the Settings screen", &History::new(), Some(&screen))
        .expect("plan");

    println!("plan:\n{}", plan.numbered());
    assert!(!plan.is_empty());
    assert!(temp.path().join("calls/001-planner/output.json").is_file());
}

#[test]
#[ignore]
fn replanner_finishes_when_history_shows_goal_done() {
    let temp = tempfile::tempdir().expect("tempdir");
    let codex = backend(temp.path());
    let plan = Plan::new(["tap Settings"]).expect("plan");
    let history = History::seeded(vec![StepRecord::new(
        "tap Settings",
        "Tapped Settings. The Settings screen is now open.",
    )]);
    let screen = ScreenState {
        locator: r#"<hierarchy><node text="Settings" resource-id="android:id/title"/></hierarchy>"#
            .to_string(),
        vision: None,
    };

    let action = ReplannerAgent::new(60_000, Vec::new())
        .replan(
            &codex,
            &ReplanContext {
                goal: "open the Settings screen",
                plan: &plan,
                history: &history,
                screen: &screen,
                replan_count: 0,
                max_replans: Some(5),
            },
        )
        .expect("action");

    println!("action: {action:?}");
    assert!(matches!(action, Action::Finish { .. }));
}

#[test]
#[ignore]
fn tool_task_returns_final_message() {
    let temp = tempfile::tempdir().expect("tempdir");
    let codex = backend(temp.path());
    let reply = codex
        .run_task("Reply with the single word: ready")
        .expect("task");
    assert!(reply.to_lowercase().contains("ready"), "{reply}");
}
