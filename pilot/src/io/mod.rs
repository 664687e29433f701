//! I/O helpers for pilot commands.

pub mod config;
pub mod executor;
pub mod process;
pub mod prompt;
pub mod run_log;
pub mod screen;
pub mod setup;
