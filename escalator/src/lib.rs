//! Staged retry and validation engine for LLM calls.
//!
//! A run sends a request, checks the response with an ordered list of
//! validators, and retries with corrective feedback until the response passes
//! or the attempt budget runs out. Repeated failure escalates: from the basic
//! stage to a tool-assisted stage (tool descriptors attached to the request),
//! and finally out of the loop with a [`orchestrator::Outcome`] that asks for
//! human review.
//!
//! - **[`core`]**: Pure, deterministic logic (thresholds, feedback text, tool
//!   attachment, attempt bookkeeping). No I/O, no async.
//! - **[`validators`]**: Deterministic checks, the AI-assisted judge, and the
//!   name-keyed registry.
//! - **[`caller`]**: The [`caller::LlmCaller`] seam to provider clients.
//! - **[`orchestrator`]**: The retry loop.
//! - **[`io`]**: TOML configuration.

pub mod caller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validators;
