//! The staged retry loop.
//!
//! One [`Orchestrator::run`] performs up to `max_attempts` calls. Each attempt
//! derives its request from the untouched original plus the feedback gathered
//! so far, runs the validators in order, and stops at the first failure.
//! Failures escalate from the basic stage to the tool-assisted stage and
//! finally out of the loop for human review.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::caller::{CallContext, LlmCaller, TransportError, call_with_limits};
use crate::core::attempt::{AttemptContext, AttemptFailure, CALLER_VALIDATOR_NAME};
use crate::core::retry_config::{ConfigError, RetryConfig, Stage};
use crate::core::types::{LlmRequest, LlmResponse, ToolDescriptor};
use crate::core::validation::{ErrorDetail, ValidationResult, kinds};
use crate::validators::{ValidationContext, Validator};

/// What a human reviewer needs to pick up an escalated run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewContext {
    /// Attempts made before escalating.
    pub attempts: u32,
    /// Stage of the final attempt.
    pub stage: Stage,
    pub original_request: LlmRequest,
    pub last_response: Option<LlmResponse>,
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every validator passed.
    Success {
        response: LlmResponse,
        accumulated_errors: Vec<AttemptFailure>,
    },
    /// All attempts failed without reaching the human review threshold, or a
    /// recursion-limit refusal ended the run early.
    Exhausted {
        last_response: Option<LlmResponse>,
        accumulated_errors: Vec<AttemptFailure>,
    },
    /// The attempt at `human_review_threshold` failed.
    HumanReviewRequired {
        accumulated_errors: Vec<AttemptFailure>,
        context: ReviewContext,
    },
    /// The run's cancellation token fired.
    Cancelled {
        last_response: Option<LlmResponse>,
        accumulated_errors: Vec<AttemptFailure>,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn accumulated_errors(&self) -> &[AttemptFailure] {
        match self {
            Self::Success {
                accumulated_errors, ..
            }
            | Self::Exhausted {
                accumulated_errors, ..
            }
            | Self::HumanReviewRequired {
                accumulated_errors, ..
            }
            | Self::Cancelled {
                accumulated_errors, ..
            } => accumulated_errors,
        }
    }

    /// Completed attempts. A cancelled in-flight attempt is not counted.
    pub fn attempts(&self) -> u32 {
        let failed = self.accumulated_errors().len() as u32;
        match self {
            Self::Success { .. } => failed + 1,
            Self::HumanReviewRequired { context, .. } => context.attempts,
            Self::Exhausted { .. } | Self::Cancelled { .. } => failed,
        }
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Exhausted { .. } => "exhausted",
            Self::HumanReviewRequired { .. } => "human_review_required",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

/// Call depth and cancellation shared by everything inside one run.
#[derive(Debug, Clone, Default)]
pub struct RunScope {
    pub depth: u32,
    pub cancel: CancellationToken,
}

impl RunScope {
    pub fn root() -> Self {
        Self::default()
    }
}

/// Runs the retry loop. Holds only the tool descriptors offered at the
/// tool-assisted stage, so one instance can serve concurrent runs.
#[derive(Debug, Clone, Default)]
pub struct Orchestrator {
    tools: Vec<ToolDescriptor>,
}

impl Orchestrator {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Top-level run: depth 0 and a token nobody cancels.
    pub async fn run(
        &self,
        request: &LlmRequest,
        validators: &[Validator],
        config: &RetryConfig,
        caller: &dyn LlmCaller,
    ) -> Result<Outcome, ConfigError> {
        self.run_scoped(request, validators, config, caller, &RunScope::root())
            .await
    }

    #[instrument(skip_all, fields(depth = scope.depth, max_attempts = config.max_attempts))]
    pub async fn run_scoped(
        &self,
        request: &LlmRequest,
        validators: &[Validator],
        config: &RetryConfig,
        caller: &dyn LlmCaller,
        scope: &RunScope,
    ) -> Result<Outcome, ConfigError> {
        config.validate()?;
        info!(
            validators = validators.len(),
            tools = self.tools.len(),
            "starting run"
        );

        let mut ctx = AttemptContext::new(request.clone());
        let mut last_response: Option<LlmResponse> = None;
        let call_timeout = config.call_timeout();

        for attempt in 1..=config.max_attempts {
            if scope.cancel.is_cancelled() {
                return Ok(cancelled(ctx, last_response));
            }
            let stage = config.stage_for(attempt);
            ctx.begin_attempt(attempt, stage);
            let outgoing = ctx.outgoing_request(&self.tools);
            let attached = outgoing.tools.clone().unwrap_or_default();
            debug!(attempt, stage = stage.as_str(), tools = attached.len(), "calling llm");

            let call_ctx = CallContext {
                depth: scope.depth,
                timeout: call_timeout,
                cancel: scope.cancel.clone(),
            };
            let failure = match call_with_limits(caller, outgoing, &call_ctx).await {
                Err(TransportError::Cancelled) => return Ok(cancelled(ctx, last_response)),
                Err(err) => {
                    warn!(attempt, error = %err, "llm call failed");
                    (CALLER_VALIDATOR_NAME.to_string(), transport_failure(&err))
                }
                Ok(response) => {
                    let verdict = {
                        let vctx = ValidationContext {
                            attempt,
                            stage,
                            original_request: ctx.original_request(),
                            tools: &attached,
                            depth: scope.depth,
                            cancel: &scope.cancel,
                        };
                        tokio::select! {
                            biased;
                            () = scope.cancel.cancelled() => None,
                            failure = first_failure(validators, &response, &vctx) => Some(failure),
                        }
                    };
                    match verdict {
                        None => return Ok(cancelled(ctx, Some(response))),
                        Some(None) => {
                            info!(attempt, "all validators passed");
                            return Ok(Outcome::Success {
                                response,
                                accumulated_errors: ctx.accumulated_errors,
                            });
                        }
                        Some(Some(failure)) => {
                            last_response = Some(response);
                            failure
                        }
                    }
                }
            };

            let (validator, result) = failure;
            debug!(
                attempt,
                validator = %validator,
                kind = result.kind().unwrap_or_default(),
                "attempt failed"
            );
            let refused = result.kind() == Some(kinds::RECURSION_LIMIT_EXCEEDED);
            ctx.record_failure(validator, result);

            if refused {
                warn!(attempt, "recursion limit reached; not retrying");
                return Ok(Outcome::Exhausted {
                    last_response,
                    accumulated_errors: ctx.accumulated_errors,
                });
            }

            if config.escalates_at(attempt) {
                warn!(attempt, "escalating to human review");
                let context = ReviewContext {
                    attempts: attempt,
                    stage,
                    original_request: ctx.original_request().clone(),
                    last_response,
                };
                return Ok(Outcome::HumanReviewRequired {
                    accumulated_errors: ctx.accumulated_errors,
                    context,
                });
            }

            if attempt < config.max_attempts {
                let delay = config.delay_after(attempt, jitter_factor(config.jitter));
                if !delay.is_zero() && !wait(delay, &scope.cancel).await {
                    return Ok(cancelled(ctx, last_response));
                }
            }
        }

        info!(attempts = config.max_attempts, "attempts exhausted");
        Ok(Outcome::Exhausted {
            last_response,
            accumulated_errors: ctx.accumulated_errors,
        })
    }
}

/// Run validators in order; return the first failing name and verdict.
async fn first_failure(
    validators: &[Validator],
    response: &LlmResponse,
    ctx: &ValidationContext<'_>,
) -> Option<(String, ValidationResult)> {
    for validator in validators {
        let result = validator.validate(response, ctx).await;
        debug!(validator = validator.name(), valid = result.is_valid(), "validator ran");
        if !result.is_valid() {
            return Some((validator.name().to_string(), result));
        }
    }
    None
}

fn transport_failure(err: &TransportError) -> ValidationResult {
    let kind = match err {
        TransportError::Timeout(_) => kinds::TIMEOUT,
        TransportError::RecursionLimit { .. } => kinds::RECURSION_LIMIT_EXCEEDED,
        _ => kinds::TRANSPORT_ERROR,
    };
    ValidationResult::fail(ErrorDetail::new(kind, err.to_string()))
}

fn jitter_factor(enabled: bool) -> f64 {
    if enabled {
        rand::thread_rng().gen_range(0.5..1.5)
    } else {
        1.0
    }
}

/// Sleep for `delay`; false if cancelled first.
async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    debug!(delay_ms = delay.as_millis() as u64, "backing off");
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

fn cancelled(ctx: AttemptContext, last_response: Option<LlmResponse>) -> Outcome {
    info!(attempt = ctx.attempt_number, "run cancelled");
    Outcome::Cancelled {
        last_response,
        accumulated_errors: ctx.accumulated_errors,
    }
}

/// An [`LlmCaller`] whose responses must pass their own validated retry loop.
///
/// The nested run inherits the incoming call depth and cancellation token, so
/// AI-assisted validators inside it see the true nesting level. Any outcome
/// other than success is reported as a [`TransportError`].
pub struct ValidatedCaller {
    orchestrator: Orchestrator,
    validators: Vec<Validator>,
    config: RetryConfig,
    inner: Arc<dyn LlmCaller>,
}

impl ValidatedCaller {
    pub fn new(
        orchestrator: Orchestrator,
        validators: Vec<Validator>,
        config: RetryConfig,
        inner: Arc<dyn LlmCaller>,
    ) -> Self {
        Self {
            orchestrator,
            validators,
            config,
            inner,
        }
    }
}

#[async_trait]
impl LlmCaller for ValidatedCaller {
    async fn call(
        &self,
        request: LlmRequest,
        ctx: &CallContext,
    ) -> Result<LlmResponse, TransportError> {
        let scope = RunScope {
            depth: ctx.depth,
            cancel: ctx.cancel.clone(),
        };
        let outcome = self
            .orchestrator
            .run_scoped(
                &request,
                &self.validators,
                &self.config,
                self.inner.as_ref(),
                &scope,
            )
            .await
            .map_err(|err| TransportError::Rejected(err.to_string()))?;

        match outcome {
            Outcome::Success { response, .. } => Ok(response),
            Outcome::Cancelled { .. } => Err(TransportError::Cancelled),
            other => {
                let errors = other.accumulated_errors();
                if errors
                    .iter()
                    .any(|f| f.result.kind() == Some(kinds::RECURSION_LIMIT_EXCEEDED))
                {
                    return Err(TransportError::RecursionLimit { depth: ctx.depth });
                }
                let last = errors
                    .last()
                    .map(|f| format!("{}: {}", f.validator, f.result.message()))
                    .unwrap_or_default();
                Err(TransportError::Rejected(format!(
                    "{} after {} attempts ({last})",
                    other.label(),
                    other.attempts()
                )))
            }
        }
    }
}

impl fmt::Debug for ValidatedCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedCaller")
            .field("validators", &self.validators)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{AlwaysFail, CountingCheck, ScriptedCaller, question};
    use crate::validators::builtin::{FnCheck, NonEmpty};

    #[tokio::test]
    async fn rejects_invalid_config_before_calling() {
        let caller = ScriptedCaller::responses(["unused"]);
        let err = Orchestrator::default()
            .run(
                &question("q"),
                &[],
                &RetryConfig::immediate(3, 3, 2),
                &caller,
            )
            .await
            .expect_err("invalid thresholds");
        assert!(matches!(err, ConfigError::ThresholdOrder { .. }));
        assert!(caller.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_validator_list_accepts_first_response() {
        let caller = ScriptedCaller::responses(["anything"]);
        let outcome = Orchestrator::default()
            .run(&question("q"), &[], &RetryConfig::immediate(3, 2, 3), &caller)
            .await
            .expect("run");
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 1);
    }

    #[tokio::test]
    async fn single_attempt_failure_is_exhausted() {
        let caller = ScriptedCaller::responses([""]);
        let validators = [Validator::deterministic(NonEmpty)];
        let outcome = Orchestrator::default()
            .run(
                &question("q"),
                &validators,
                &RetryConfig::immediate(1, 1, 1),
                &caller,
            )
            .await
            .expect("run");
        let Outcome::Exhausted {
            last_response,
            accumulated_errors,
        } = outcome
        else {
            panic!("expected exhausted, got {outcome:?}");
        };
        assert_eq!(last_response, Some(LlmResponse::new("")));
        assert_eq!(accumulated_errors.len(), 1);
        assert_eq!(accumulated_errors[0].validator, "non_empty");
    }

    #[tokio::test]
    async fn transport_error_is_recorded_without_running_validators() {
        let caller = ScriptedCaller::new([
            Err(TransportError::Transport("503".to_string())),
            Ok(LlmResponse::new("fine")),
        ]);
        let counter = CountingCheck::passing("count");
        let validators = [Validator::deterministic(counter.clone())];
        let outcome = Orchestrator::default()
            .run(
                &question("q"),
                &validators,
                &RetryConfig::immediate(3, 3, 3),
                &caller,
            )
            .await
            .expect("run");

        assert!(outcome.is_success());
        assert_eq!(counter.calls(), 1);
        let failure = &outcome.accumulated_errors()[0];
        assert_eq!(failure.validator, CALLER_VALIDATOR_NAME);
        assert_eq!(failure.result.kind(), Some(kinds::TRANSPORT_ERROR));
    }

    #[tokio::test]
    async fn human_review_carries_review_context() {
        let caller = ScriptedCaller::responses(["a", "b"]);
        let validators = [Validator::deterministic(AlwaysFail::new("strict"))];
        let outcome = Orchestrator::default()
            .run(
                &question("q"),
                &validators,
                &RetryConfig::immediate(3, 2, 2),
                &caller,
            )
            .await
            .expect("run");

        let Outcome::HumanReviewRequired { context, .. } = &outcome else {
            panic!("expected human review, got {outcome:?}");
        };
        assert_eq!(context.attempts, 2);
        assert_eq!(context.stage, Stage::ToolAssisted);
        assert_eq!(context.original_request, question("q"));
        assert_eq!(context.last_response, Some(LlmResponse::new("b")));
        assert_eq!(outcome.attempts(), 2);
    }

    #[tokio::test]
    async fn recursion_refusal_ends_the_run_without_retrying() {
        let caller = ScriptedCaller::responses(vec!["answer"; 5]);
        let refusing = FnCheck::new("nested_judge", |_| {
            ValidationResult::fail(ErrorDetail::new(
                kinds::RECURSION_LIMIT_EXCEEDED,
                "validator call depth 1 reached the limit of 1",
            ))
        });
        let validators = [Validator::deterministic(refusing)];

        let outcome = Orchestrator::default()
            .run(
                &question("q"),
                &validators,
                &RetryConfig::immediate(5, 2, 5),
                &caller,
            )
            .await
            .expect("run");

        assert!(matches!(outcome, Outcome::Exhausted { .. }), "{outcome:?}");
        assert_eq!(caller.call_count(), 1);
        assert_eq!(outcome.accumulated_errors().len(), 1);
    }

    #[test]
    fn jitter_factor_stays_in_range() {
        for _ in 0..200 {
            let factor = jitter_factor(true);
            assert!((0.5..1.5).contains(&factor), "factor {factor}");
        }
        assert_eq!(jitter_factor(false), 1.0);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = Outcome::Exhausted {
            last_response: None,
            accumulated_errors: Vec::new(),
        };
        let value = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(value["outcome"], "exhausted");
    }
}
