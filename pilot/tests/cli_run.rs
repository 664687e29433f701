//! CLI tests for `pilot init` and `pilot run`.
//!
//! Spawns the pilot binary against shell scripts standing in for the device
//! and the agent CLI, and verifies exit codes, stdout and run artifacts.

use std::fs;
use std::path::Path;
use std::process::Command;

use pilot::exit_codes;
use pilot::io::config::{PilotConfig, load_config};

#[test]
fn init_writes_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = Command::new(env!("CARGO_BIN_EXE_pilot"))
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("pilot init");
    assert_eq!(status.code(), Some(exit_codes::OK));
    let cfg = load_config(&temp.path().join("pilot.toml")).expect("load");
    assert_eq!(cfg, PilotConfig::default());

    let status = Command::new(env!("CARGO_BIN_EXE_pilot"))
        .current_dir(temp.path())
        .arg("init")
        .status()
        .expect("pilot init again");
    assert_eq!(status.code(), Some(exit_codes::INVALID));

    let status = Command::new(env!("CARGO_BIN_EXE_pilot"))
        .current_dir(temp.path())
        .args(["init", "--force"])
        .status()
        .expect("pilot init --force");
    assert_eq!(status.code(), Some(exit_codes::OK));
}

#[test]
fn run_rejects_blank_goal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = Command::new(env!("CARGO_BIN_EXE_pilot"))
        .current_dir(temp.path())
        .args(["run", "--goal", "   "])
        .status()
        .expect("pilot run");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

/// Fake agent CLI: answers planner and replanner prompts with fixed JSON and
/// executor tasks with plain text.
#[cfg(unix)]
const FAKE_AGENT: &str = r####"
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --output-last-message) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
prompt=$(cat)
case "$prompt" in
  *"### Planner Contract"*) printf '%s' '{"steps":["tap OK"]}' > "$out" ;;
  *"### Replanner Contract"*) printf '%s' "$REPLANNER_OUTPUT" > "$out" ;;
  *) printf 'tapped OK' > "$out" ;;
esac
"####;

#[cfg(unix)]
fn write_fixture(root: &Path, max_replans: Option<u32>) {
    fs::write(root.join("agent.sh"), FAKE_AGENT).expect("write agent");
    let max = max_replans
        .map(|m| format!("max_replans = {m}\n"))
        .unwrap_or_default();
    let config = format!(
        r#"{max}step_ceiling = 20
run_dir = "runs"

[screen]
screenshot_command = []
locator_command = ["echo", "<hierarchy><node text='OK'/></hierarchy>"]

[agent]
command = ["sh", "agent.sh"]
args = []
timeout_secs = 10

[[setup]]
name = "select_platform"
command = ["echo", "android"]
"#
    );
    fs::write(root.join("pilot.toml"), config).expect("write config");
}

#[cfg(unix)]
fn only_run_dir(root: &Path) -> std::path::PathBuf {
    let mut entries: Vec<_> = fs::read_dir(root.join("runs"))
        .expect("runs dir")
        .map(|entry| entry.expect("entry").path())
        .collect();
    assert_eq!(entries.len(), 1);
    entries.remove(0)
}

#[cfg(unix)]
#[test]
fn run_finishes_and_writes_artifacts() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_fixture(temp.path(), Some(5));

    let output = Command::new(env!("CARGO_BIN_EXE_pilot"))
        .current_dir(temp.path())
        .env(
            "REPLANNER_OUTPUT",
            r#"{"action":"finish","steps":[],"response":"dialog dismissed"}"#,
        )
        .args(["run", "--goal", "dismiss the dialog"])
        .output()
        .expect("pilot run");

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "dialog dismissed");

    let run_dir = only_run_dir(temp.path());
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(run_dir.join("summary.json")).expect("summary"))
            .expect("summary json");
    assert_eq!(summary["reason"], "finished");
    assert_eq!(summary["state"]["history"][0]["step"], "select_platform");
    assert_eq!(summary["state"]["history"][0]["outcome"], "android");
    assert_eq!(summary["state"]["history"][1]["outcome"], "tapped OK");

    let events = fs::read_to_string(run_dir.join("events.jsonl")).expect("events");
    assert!(events.lines().any(|line| line.contains("\"event\":\"terminated\"")));

    let planner_prompt =
        fs::read_to_string(run_dir.join("calls/001-planner/prompt.md")).expect("planner prompt");
    assert!(planner_prompt.contains("<node text='OK'/>"));
    assert!(run_dir.join("calls/002-executor/output.txt").is_file());
    assert!(run_dir.join("calls/003-replanner/schema.json").is_file());
}

#[cfg(unix)]
#[test]
fn exhausted_bound_exits_with_forced_termination() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_fixture(temp.path(), Some(5));

    let output = Command::new(env!("CARGO_BIN_EXE_pilot"))
        .current_dir(temp.path())
        .env("REPLANNER_OUTPUT", r#"{"action":"finish","steps":[],"response":"unused"}"#)
        .args(["run", "--goal", "dismiss the dialog", "--max-replans", "0"])
        .output()
        .expect("pilot run");

    assert_eq!(output.status.code(), Some(exit_codes::FORCED_TERMINATION));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("maximum of 0 replans"), "{stdout}");
}

#[cfg(unix)]
#[test]
fn runaway_loop_exits_with_step_ceiling_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_fixture(temp.path(), None);

    let output = Command::new(env!("CARGO_BIN_EXE_pilot"))
        .current_dir(temp.path())
        .env(
            "REPLANNER_OUTPUT",
            r#"{"action":"continue","steps":["tap OK"],"response":""}"#,
        )
        .args(["run", "--goal", "dismiss the dialog", "--step-ceiling", "6"])
        .output()
        .expect("pilot run");

    assert_eq!(output.status.code(), Some(exit_codes::STEP_CEILING));
    assert!(String::from_utf8_lossy(&output.stderr).contains("step ceiling of 6"));

    let run_dir = only_run_dir(temp.path());
    let summary = fs::read_to_string(run_dir.join("summary.json")).expect("summary");
    assert!(summary.contains("step ceiling of 6"));
}
