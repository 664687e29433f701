//! Pre-planning setup commands (platform selection, session creation).

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::StepRecord;
use crate::io::config::SetupStep;
use crate::io::process::{CommandLimits, command_from_argv, run_command};

/// Run each setup command in order, recording its output as a history entry.
///
/// A failing command records `Error: <reason>` and the remaining commands still
/// run; only spawn-level problems (and an empty argv) are returned as errors.
/// Stops early, returning what ran so far, once `cancel` is set.
#[instrument(skip_all, fields(steps = steps.len()))]
pub fn run_setup(
    steps: &[SetupStep],
    limits: CommandLimits,
    cancel: &CancelToken,
) -> Result<Vec<StepRecord>> {
    let mut records = Vec::with_capacity(steps.len());
    for step in steps {
        if cancel.is_cancelled() {
            warn!(step = %step.name, "setup interrupted by cancellation");
            break;
        }
        let cmd = command_from_argv(&step.command)?;
        let record = match run_command(cmd, None, limits, Some(cancel)) {
            Ok(output) if output.success() => {
                StepRecord::new(&step.name, output.stdout_lossy().trim())
            }
            Ok(output) => StepRecord::failed(&step.name, output.failure_summary(&step.name)),
            Err(err) => StepRecord::failed(&step.name, format!("{err:#}")),
        };
        info!(step = %record.step, failed = record.is_failure(), "setup step finished");
        records.push(record);
    }
    Ok(records)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup(name: &str, script: &str) -> SetupStep {
        SetupStep {
            name: name.to_string(),
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        }
    }

    fn limits() -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(5),
            output_limit_bytes: 4096,
        }
    }

    #[test]
    fn records_outputs_and_continues_past_failures() {
        let steps = [
            setup("select_platform", "echo android"),
            setup("create_session", "echo refused >&2; exit 1"),
            setup("check", "echo ok"),
        ];
        let records = run_setup(&steps, limits(), &CancelToken::new()).expect("setup");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], StepRecord::new("select_platform", "android"));
        assert!(records[1].is_failure());
        assert!(records[1].outcome.contains("refused"));
        assert_eq!(records[2].outcome, "ok");
    }

    #[test]
    fn cancelled_setup_runs_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let records = run_setup(&[setup("a", "echo a")], limits(), &token).expect("setup");
        assert!(records.is_empty());
    }
}
