//! Helpers for running child processes with timeouts, cancellation and
//! bounded output.

use std::io::{ErrorKind, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// How often a waiting child is checked for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Limits applied to one child process.
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    /// Maximum time before killing the command.
    pub timeout: Duration,
    /// Maximum bytes kept from each of stdout and stderr.
    pub output_limit_bytes: usize,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && !self.cancelled && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// One-line reason for a non-successful run, including a stderr excerpt.
    pub fn failure_summary(&self, label: &str) -> String {
        if self.cancelled {
            return format!("{label} cancelled");
        }
        if self.timed_out {
            return format!("{label} timed out");
        }
        let stderr = String::from_utf8_lossy(&self.stderr);
        let excerpt: String = stderr.trim().chars().take(500).collect();
        if excerpt.is_empty() {
            format!("{label} exited with status {:?}", self.status.code())
        } else {
            format!(
                "{label} exited with status {:?}: {excerpt}",
                self.status.code()
            )
        }
    }

    /// Render stdout/stderr as a log body, noting truncation.
    pub fn render_log(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        if self.cancelled {
            buf.push_str(&format!("\n[{label} cancelled]\n"));
        }
        buf
    }
}

/// Run a command, capturing stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. The child is killed when
/// the timeout elapses or `cancel` is set; both are reported on the output
/// rather than as errors.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs(), output_limit_bytes = limits.output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: CommandLimits,
    cancel: Option<&CancelToken>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        match child_stdin.write_all(input) {
            Ok(()) => {}
            // The child exited without reading its input; its status and
            // stderr carry the real reason.
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                warn!("child closed stdin before reading all input");
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err).context("write stdin");
            }
        }
        // Dropping closes the pipe so the child sees EOF.
    }

    let deadline = Instant::now() + limits.timeout;
    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        let now = Instant::now();
        let slice = deadline.saturating_duration_since(now).min(CANCEL_POLL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            warn!("command cancelled, killing");
            cancelled = true;
        } else if Instant::now() >= deadline {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
        } else {
            continue;
        }
        child.kill().context("kill command")?;
        break child.wait().context("wait command after kill")?;
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

/// Build a [`Command`] from an argv vector.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn limits(secs: u64, bytes: usize) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(secs),
            output_limit_bytes: bytes,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stdin() {
        let output = run_command(sh("cat"), Some(b"hello"), limits(5, 1024), None).expect("run");
        assert!(output.success());
        assert_eq!(output.stdout_lossy(), "hello");
    }

    #[test]
    fn truncates_beyond_limit() {
        let output =
            run_command(sh("printf 'abcdefghij'"), None, limits(5, 4), None).expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.render_log("locator dump").contains("truncated 6 bytes"));
    }

    #[test]
    fn kills_on_timeout() {
        let mut limits = limits(0, 1024);
        limits.timeout = Duration::from_millis(300);
        let output = run_command(sh("sleep 5"), None, limits, None).expect("run");
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[test]
    fn kills_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let output = run_command(sh("sleep 5"), None, limits(10, 1024), Some(&token)).expect("run");
        assert!(output.cancelled);
        assert_eq!(output.failure_summary("locator dump"), "locator dump cancelled");
    }

    #[test]
    fn failure_summary_includes_stderr() {
        let output =
            run_command(sh("echo boom >&2; exit 3"), None, limits(5, 1024), None).expect("run");
        assert!(!output.success());
        let summary = output.failure_summary("locator dump");
        assert!(summary.contains("Some(3)"));
        assert!(summary.contains("boom"));
    }

    #[test]
    fn early_exit_keeps_child_failure_reason() {
        let input = vec![b'x'; 1 << 20];
        let output = run_command(
            sh("echo 'agent refused: not logged in' >&2; exit 7"),
            Some(&input),
            limits(5, 1024),
            None,
        )
        .expect("run");
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(7));
        let summary = output.failure_summary("agent exec");
        assert!(summary.contains("agent refused: not logged in"), "{summary}");
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(command_from_argv(&[]).is_err());
    }
}
