//! Pilot configuration stored in `pilot.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::StepRecord;
use crate::core::vision::DEFAULT_JPEG_QUALITY;
use crate::io::process::CommandLimits;

pub const DEFAULT_CONFIG_PATH: &str = "pilot.toml";

/// Pilot configuration (TOML).
///
/// Missing fields default to values suitable for an Android device reachable
/// over `adb` and a `codex` CLI on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PilotConfig {
    /// Maximum replanner decisions per run. Omit for unlimited.
    #[serde(default)]
    pub max_replans: Option<u32>,

    /// Hard ceiling on orchestrator phase transitions per run.
    pub step_ceiling: u32,

    /// Directory receiving per-run artifacts (`<run_dir>/<run_id>/`).
    pub run_dir: PathBuf,

    /// Maximum bytes for a rendered prompt before dropping sections.
    pub prompt_budget_bytes: usize,

    /// Domain hints rendered into every prompt.
    pub hints: Vec<String>,

    pub screen: ScreenConfig,

    pub agent: AgentConfig,

    /// Static history entries prepended to every run.
    pub seed_history: Vec<SeedStep>,

    /// Commands run before planning; each becomes a seed history entry.
    pub setup: Vec<SetupStep>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotEncoding {
    /// Command prints raw image bytes.
    Raw,
    /// Command prints a base64 string.
    Base64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScreenConfig {
    /// Command printing the current screenshot. Empty disables screenshots.
    pub screenshot_command: Vec<String>,
    pub screenshot_encoding: ScreenshotEncoding,
    /// Command printing the structural locator dump.
    pub locator_command: Vec<String>,
    pub jpeg_quality: u8,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            screenshot_command: argv(&["adb", "exec-out", "screencap", "-p"]),
            screenshot_encoding: ScreenshotEncoding::Raw,
            locator_command: argv(&["adb", "exec-out", "uiautomator", "dump", "/dev/tty"]),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            timeout_secs: 30,
            output_limit_bytes: 20_000_000,
        }
    }
}

impl ScreenConfig {
    pub fn limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent CLI invocation, e.g. `["codex", "exec"]`.
    pub command: Vec<String>,
    /// Extra arguments appended before the prompt marker.
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: argv(&["codex", "exec"]),
            args: argv(&["--skip-git-repo-check"]),
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl AgentConfig {
    pub fn limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedStep {
    pub step: String,
    pub outcome: String,
}

impl From<&SeedStep> for StepRecord {
    fn from(seed: &SeedStep) -> Self {
        StepRecord::new(seed.step.clone(), seed.outcome.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetupStep {
    /// Label recorded as the history step description.
    pub name: String,
    pub command: Vec<String>,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            max_replans: Some(10),
            step_ceiling: 50,
            run_dir: PathBuf::from(".pilot/runs"),
            prompt_budget_bytes: 60_000,
            hints: Vec::new(),
            screen: ScreenConfig::default(),
            agent: AgentConfig::default(),
            seed_history: Vec::new(),
            setup: Vec::new(),
        }
    }
}

impl PilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_ceiling == 0 {
            return Err(anyhow!("step_ceiling must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.screen.timeout_secs == 0 {
            return Err(anyhow!("screen.timeout_secs must be > 0"));
        }
        if self.screen.output_limit_bytes == 0 {
            return Err(anyhow!("screen.output_limit_bytes must be > 0"));
        }
        if !(1..=100).contains(&self.screen.jpeg_quality) {
            return Err(anyhow!("screen.jpeg_quality must be in 1..=100"));
        }
        if !is_usable_argv(&self.screen.locator_command) {
            return Err(anyhow!("screen.locator_command must be a non-empty array"));
        }
        if !self.screen.screenshot_command.is_empty()
            && !is_usable_argv(&self.screen.screenshot_command)
        {
            return Err(anyhow!("screen.screenshot_command has an empty program"));
        }
        if !is_usable_argv(&self.agent.command) {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        for setup in &self.setup {
            if setup.name.trim().is_empty() {
                return Err(anyhow!("setup entries need a non-empty name"));
            }
            if !is_usable_argv(&setup.command) {
                return Err(anyhow!(
                    "setup '{}' must have a non-empty command array",
                    setup.name
                ));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<PilotConfig> {
    if !path.exists() {
        let cfg = PilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

fn is_usable_argv(command: &[String]) -> bool {
    command.first().is_some_and(|program| !program.trim().is_empty())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
