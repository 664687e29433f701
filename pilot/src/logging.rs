//! Diagnostic tracing for `pilot` runs.
//!
//! Tracing covers what an operator needs while a run is live: phase
//! transitions, capture degradation, prompt truncation and child-process
//! failures. It goes to stderr, filtered by `RUST_LOG`, and is never
//! persisted. The durable record of a run is `events.jsonl` and
//! `summary.json` from [`crate::io::run_log::RunLog`], which is written
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. `RUST_LOG` selects the filter and
/// defaults to `warn`, so truncated locator dumps and failed captures still
/// show up.
///
/// ```bash
/// RUST_LOG=pilot::orchestrator=debug,pilot::io::executor=info pilot run --goal "open settings"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
