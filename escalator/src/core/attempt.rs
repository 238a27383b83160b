//! Per-run attempt bookkeeping.

use serde::Serialize;

use crate::core::feedback::build_feedback;
use crate::core::retry_config::Stage;
use crate::core::tools::maybe_attach;
use crate::core::types::{LlmRequest, Message, ToolDescriptor};
use crate::core::validation::ValidationResult;

/// Validator name recorded when the LLM call itself failed.
pub const CALLER_VALIDATOR_NAME: &str = "llm_caller";

/// One failed attempt: the first failing validator and its verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub validator: String,
    pub stage: Stage,
    pub result: ValidationResult,
}

/// Mutable state scoped to a single orchestrator run.
///
/// The original request is never modified; each attempt derives a fresh
/// outgoing request from it.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub attempt_number: u32,
    pub stage: Stage,
    pub accumulated_errors: Vec<AttemptFailure>,
    original_request: LlmRequest,
}

impl AttemptContext {
    pub fn new(original_request: LlmRequest) -> Self {
        Self {
            attempt_number: 0,
            stage: Stage::Basic,
            accumulated_errors: Vec::new(),
            original_request,
        }
    }

    pub fn original_request(&self) -> &LlmRequest {
        &self.original_request
    }

    pub fn begin_attempt(&mut self, attempt_number: u32, stage: Stage) {
        self.attempt_number = attempt_number;
        self.stage = stage;
    }

    pub fn record_failure(&mut self, validator: impl Into<String>, result: ValidationResult) {
        self.accumulated_errors.push(AttemptFailure {
            attempt: self.attempt_number,
            validator: validator.into(),
            stage: self.stage,
            result,
        });
    }

    /// Build the request for the current attempt: the original conversation,
    /// plus the accumulated feedback as a trailing user message, plus tool
    /// descriptors when the stage allows them.
    pub fn outgoing_request(&self, tools: &[ToolDescriptor]) -> LlmRequest {
        let mut request = maybe_attach(&self.original_request, self.stage, tools);
        let feedback = build_feedback(&self.accumulated_errors, self.stage, tools);
        if !feedback.is_empty() {
            request.messages.push(Message::user(feedback));
        }
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;
    use crate::core::validation::{ErrorDetail, kinds};

    fn tool(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            invocation: serde_json::Value::Null,
            env: Default::default(),
        }
    }

    #[test]
    fn first_attempt_is_the_original_request() {
        let original = LlmRequest::new(vec![Message::user("question")]);
        let mut ctx = AttemptContext::new(original.clone());
        ctx.begin_attempt(1, Stage::Basic);

        assert_eq!(ctx.outgoing_request(&[tool("search")]), original);
    }

    #[test]
    fn later_attempts_append_feedback_and_tools_without_touching_original() {
        let original = LlmRequest::new(vec![Message::user("question")]);
        let mut ctx = AttemptContext::new(original.clone());
        ctx.begin_attempt(1, Stage::Basic);
        ctx.record_failure(
            "json",
            ValidationResult::fail(ErrorDetail::new(kinds::NOT_JSON, "not json")),
        );
        ctx.begin_attempt(2, Stage::ToolAssisted);

        let outgoing = ctx.outgoing_request(&[tool("search")]);

        assert_eq!(outgoing.messages.len(), 2);
        let feedback = &outgoing.messages[1];
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.contains("Attempt 1 (json): not json"));
        assert_eq!(outgoing.tools.as_deref().map(<[_]>::len), Some(1));
        assert_eq!(ctx.original_request(), &original);
        assert_eq!(ctx.accumulated_errors[0].stage, Stage::Basic);
    }
}
