//! Model and agent backends.
//!
//! [`StructuredModel`] turns a prompt (plus an optional screenshot) into JSON
//! constrained by a schema. [`ToolAgent`] performs one task against the device
//! through whatever tools the backend has configured and returns its final
//! message. [`CodexExec`] implements both by spawning `codex exec`; tests use
//! scripted backends that return predetermined outputs without spawning
//! processes.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::types::VisionPayload;
use crate::io::config::AgentConfig;
use crate::io::process::{CommandOutput, command_from_argv, run_command};

/// One structured-output model call.
#[derive(Debug, Clone)]
pub struct ModelRequest<'a> {
    /// Caller role, used for artifact names and error messages.
    pub role: &'static str,
    /// Rendered prompt text.
    pub prompt: String,
    /// JSON Schema constraining the response.
    pub output_schema: &'static str,
    /// Screenshot to attach, when vision grounding is available.
    pub image: Option<&'a VisionPayload>,
}

/// Backend producing schema-constrained JSON.
pub trait StructuredModel {
    fn generate(&self, request: &ModelRequest<'_>) -> Result<Value>;
}

/// Backend that performs a task with device tools and returns the final text.
pub trait ToolAgent {
    fn run_task(&self, task: &str) -> Result<String>;
}

/// Backend that spawns `codex exec` (or a compatible CLI) once per call.
///
/// Each call writes its prompt, schema, attached image, output and process log
/// into a numbered directory under `artifact_dir/calls/`.
#[derive(Debug)]
pub struct CodexExec {
    config: AgentConfig,
    workdir: PathBuf,
    artifact_dir: PathBuf,
    cancel: CancelToken,
    calls: Cell<u32>,
}

/// Files produced by one backend call.
#[derive(Debug, Clone)]
struct CallPaths {
    dir: PathBuf,
    prompt_path: PathBuf,
    schema_path: PathBuf,
    image_path: PathBuf,
    output_path: PathBuf,
    log_path: PathBuf,
}

impl CallPaths {
    fn new(artifact_dir: &Path, seq: u32, label: &str, output_name: &str) -> Self {
        let dir = artifact_dir.join("calls").join(format!("{seq:03}-{label}"));
        Self {
            prompt_path: dir.join("prompt.md"),
            schema_path: dir.join("schema.json"),
            image_path: dir.join("screen.jpg"),
            output_path: dir.join(output_name),
            log_path: dir.join("exec.log"),
            dir,
        }
    }
}

impl CodexExec {
    pub fn new(
        config: AgentConfig,
        workdir: impl Into<PathBuf>,
        artifact_dir: impl Into<PathBuf>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            workdir: workdir.into(),
            artifact_dir: artifact_dir.into(),
            cancel,
            calls: Cell::new(0),
        }
    }

    fn next_call(&self, label: &str, output_name: &str) -> Result<CallPaths> {
        let seq = self.calls.get() + 1;
        self.calls.set(seq);
        let paths = CallPaths::new(&self.artifact_dir, seq, label, output_name);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create call dir {}", paths.dir.display()))?;
        Ok(paths)
    }

    fn invoke(&self, paths: &CallPaths, prompt: &str, extra: &[(&str, &Path)]) -> Result<()> {
        fs::write(&paths.prompt_path, prompt)
            .with_context(|| format!("write {}", paths.prompt_path.display()))?;

        let mut cmd = command_from_argv(&self.config.command).context("agent.command")?;
        cmd.args(&self.config.args);
        // `--image` is variadic; keep it ahead of the other flags.
        for (flag, path) in extra {
            cmd.arg(flag).arg(path);
        }
        cmd.arg("--output-last-message")
            .arg(&paths.output_path)
            .arg("-")
            .current_dir(&self.workdir);

        info!(call_dir = %paths.dir.display(), "starting agent exec");
        let output = run_command(
            cmd,
            Some(prompt.as_bytes()),
            self.config.limits(),
            Some(&self.cancel),
        )
        .context("run agent exec")?;
        write_exec_log(&paths.log_path, &output)?;

        if !output.success() {
            warn!(exit_code = ?output.status.code(), timed_out = output.timed_out, "agent exec failed");
            return Err(anyhow!(output.failure_summary("agent exec")));
        }
        if !paths.output_path.exists() {
            return Err(anyhow!(
                "missing agent output {}",
                paths.output_path.display()
            ));
        }
        debug!("agent exec completed successfully");
        Ok(())
    }
}

impl StructuredModel for CodexExec {
    #[instrument(skip_all, fields(role = request.role, has_image = request.image.is_some()))]
    fn generate(&self, request: &ModelRequest<'_>) -> Result<Value> {
        let paths = self.next_call(request.role, "output.json")?;
        fs::write(&paths.schema_path, request.output_schema)
            .with_context(|| format!("write schema {}", paths.schema_path.display()))?;

        let mut extra: Vec<(&str, &Path)> = Vec::new();
        if let Some(image) = request.image {
            fs::write(&paths.image_path, &image.jpeg)
                .with_context(|| format!("write {}", paths.image_path.display()))?;
            extra.push(("--image", paths.image_path.as_path()));
        }
        extra.push(("--output-schema", paths.schema_path.as_path()));

        self.invoke(&paths, &request.prompt, &extra)?;
        read_output_json(&paths.output_path)
    }
}

impl ToolAgent for CodexExec {
    #[instrument(skip_all)]
    fn run_task(&self, task: &str) -> Result<String> {
        let paths = self.next_call("executor", "output.txt")?;
        self.invoke(&paths, task, &[])?;
        let text = fs::read_to_string(&paths.output_path)
            .with_context(|| format!("read agent output {}", paths.output_path.display()))?;
        Ok(text.trim().to_string())
    }
}

fn read_output_json(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read agent output {}", path.display()))?;
    let value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(value)
}

fn write_exec_log(path: &Path, output: &CommandOutput) -> Result<()> {
    fs::write(path, output.render_log("agent"))
        .with_context(|| format!("write exec log {}", path.display()))
}
