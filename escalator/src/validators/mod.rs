//! Validators that decide whether a response is good enough.
//!
//! Validators form a closed set of variants behind one `validate` entry point:
//!
//! - **Deterministic**: a pure function of the response ([`DeterministicCheck`]).
//! - **AI-assisted**: issues its own secondary LLM call to judge the response
//!   ([`ai_assisted::AiAssistedValidator`]).
//!
//! Validators are built once (usually through the [`registry`]) and never
//! mutated while a run uses them.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::retry_config::Stage;
use crate::core::types::{LlmRequest, LlmResponse, ToolDescriptor};
use crate::core::validation::ValidationResult;

pub mod ai_assisted;
pub mod builtin;
pub mod registry;

use ai_assisted::AiAssistedValidator;

/// A check that is a pure function of the response.
pub trait DeterministicCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, response: &LlmResponse) -> ValidationResult;
}

/// Attempt state visible to validators.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub attempt: u32,
    pub stage: Stage,
    pub original_request: &'a LlmRequest,
    /// Tool descriptors attached to this attempt's outgoing request.
    pub tools: &'a [ToolDescriptor],
    /// Validator-triggered call depth of the run that owns this attempt.
    pub depth: u32,
    pub cancel: &'a CancellationToken,
}

#[derive(Clone)]
pub enum Validator {
    Deterministic(Arc<dyn DeterministicCheck>),
    AiAssisted(Arc<AiAssistedValidator>),
}

impl Validator {
    pub fn deterministic(check: impl DeterministicCheck + 'static) -> Self {
        Self::Deterministic(Arc::new(check))
    }

    pub fn ai_assisted(validator: AiAssistedValidator) -> Self {
        Self::AiAssisted(Arc::new(validator))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Deterministic(check) => check.name(),
            Self::AiAssisted(validator) => validator.name(),
        }
    }

    pub async fn validate(
        &self,
        response: &LlmResponse,
        ctx: &ValidationContext<'_>,
    ) -> ValidationResult {
        match self {
            Self::Deterministic(check) => check.check(response),
            Self::AiAssisted(validator) => validator.validate(response, ctx).await,
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Self::Deterministic(_) => "Deterministic",
            Self::AiAssisted(_) => "AiAssisted",
        };
        f.debug_tuple(variant).field(&self.name()).finish()
    }
}
