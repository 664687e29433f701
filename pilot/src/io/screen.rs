//! Screen grounding: capability abstraction and the capture pipeline.
//!
//! The [`ScreenCapabilities`] trait decouples capture from the device
//! transport. [`CommandScreen`] shells out to configured commands (by default
//! `adb`); tests use scripted capabilities.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::error::ScreenCaptureError;
use crate::core::types::ScreenState;
use crate::core::vision::{DEFAULT_JPEG_QUALITY, normalize_screenshot};
use crate::io::config::{ScreenConfig, ScreenshotEncoding};
use crate::io::process::{command_from_argv, run_command};

/// Screenshot and locator-dump capabilities of the device under test.
pub trait ScreenCapabilities {
    /// Current screenshot as base64, or `None` when unavailable.
    fn screenshot(&self) -> Result<Option<String>>;

    /// Structural description of the current screen's elements.
    fn locators(&self) -> Result<String>;
}

/// Captures and normalizes screen state. Never fails: every problem degrades
/// to partial grounding.
#[derive(Debug, Clone)]
pub struct ScreenStateProvider<C> {
    capabilities: C,
    jpeg_quality: u8,
}

impl<C: ScreenCapabilities> ScreenStateProvider<C> {
    pub fn new(capabilities: C) -> Self {
        Self {
            capabilities,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn capabilities(&self) -> &C {
        &self.capabilities
    }

    #[instrument(skip_all)]
    pub fn capture(&self) -> ScreenState {
        let screenshot = match self.capabilities.screenshot() {
            Ok(shot) => shot.filter(|s| !s.trim().is_empty()),
            Err(err) => {
                let err = ScreenCaptureError::Screenshot(format!("{err:#}"));
                warn!(err = %err, "continuing without vision grounding");
                None
            }
        };

        let locator = match self.capabilities.locators() {
            Ok(locator) => locator,
            Err(err) => {
                let err = ScreenCaptureError::Locator(format!("{err:#}"));
                warn!(err = %err, "continuing without locator grounding");
                String::new()
            }
        };

        let Some(screenshot) = screenshot else {
            debug!(locator_bytes = locator.len(), "no screenshot available");
            return ScreenState {
                locator,
                vision: None,
            };
        };

        let vision = match normalize_screenshot(&screenshot, self.jpeg_quality) {
            Ok(payload) => {
                debug!(
                    width = payload.width,
                    height = payload.height,
                    jpeg_bytes = payload.jpeg.len(),
                    "screenshot normalized"
                );
                Some(payload)
            }
            Err(err) => {
                warn!(err = %err, "screenshot normalization failed, using locator only");
                None
            }
        };

        ScreenState { locator, vision }
    }
}

/// Capabilities backed by shell commands from `[screen]` config.
#[derive(Debug, Clone)]
pub struct CommandScreen {
    config: ScreenConfig,
    cancel: CancelToken,
}

impl CommandScreen {
    pub fn new(config: ScreenConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }
}

impl ScreenCapabilities for CommandScreen {
    #[instrument(skip_all)]
    fn screenshot(&self) -> Result<Option<String>> {
        if self.config.screenshot_command.is_empty() {
            return Ok(None);
        }
        let cmd = command_from_argv(&self.config.screenshot_command)?;
        let output = run_command(cmd, None, self.config.limits(), Some(&self.cancel))
            .context("run screenshot command")?;
        if !output.success() {
            warn!(reason = %output.failure_summary("screenshot command"), "screenshot unavailable");
            return Ok(None);
        }
        if output.stdout_truncated > 0 {
            warn!(
                truncated = output.stdout_truncated,
                "screenshot exceeded output limit"
            );
            return Ok(None);
        }
        if output.stdout.is_empty() {
            return Ok(None);
        }
        let encoded = match self.config.screenshot_encoding {
            ScreenshotEncoding::Raw => STANDARD.encode(&output.stdout),
            ScreenshotEncoding::Base64 => output.stdout_lossy(),
        };
        Ok(Some(encoded))
    }

    #[instrument(skip_all)]
    fn locators(&self) -> Result<String> {
        let cmd = command_from_argv(&self.config.locator_command)?;
        let output = run_command(cmd, None, self.config.limits(), Some(&self.cancel))
            .context("run locator command")?;
        if !output.success() {
            anyhow::bail!(output.failure_summary("locator command"));
        }
        Ok(output.stdout_lossy())
    }
}
