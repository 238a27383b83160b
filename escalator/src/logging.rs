//! Diagnostic tracing for the engine.
//!
//! Run outcomes are data ([`crate::orchestrator::Outcome`]) and are never
//! derived from log output. Tracing only explains how a run got there: attempt
//! starts, validator verdicts, transport failures, backoff, and escalation.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `warn` if unset. Output goes to stderr in
/// compact format so stdout stays reserved for command output.
///
/// # Example
/// ```bash
/// RUST_LOG=escalator=debug escalator check --config escalator.toml
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (tests, embedding applications) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
