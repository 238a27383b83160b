//! Validator that judges a response through a secondary LLM call.
//!
//! The secondary call is a separate invocation: it shares no retry state with
//! the run being validated. Recursion is bounded by an explicit depth counter
//! carried in [`ValidationContext::depth`] and [`CallContext::depth`]; a
//! validator refuses to call once the depth reaches its limit.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior, context};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::caller::{CallContext, LlmCaller, TransportError, call_with_limits};
use crate::core::json::extract_json;
use crate::core::retry_config::Stage;
use crate::core::types::{LlmRequest, LlmResponse, Message, ToolDescriptor};
use crate::core::validation::{ErrorDetail, ValidationResult, kinds};
use crate::validators::registry::{self, ValidatorFactory};
use crate::validators::{ValidationContext, Validator};

pub const DEFAULT_TEMPLATE: &str = include_str!("prompts/judge.md");
pub const DEFAULT_MAX_DEPTH: u32 = 1;

/// Parameters accepted by [`AiAssistedValidator::from_params`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AiAssistedParams {
    pub task_prompt_template: Option<String>,
    pub required_tools: Vec<String>,
    pub max_depth: u32,
    pub timeout_secs: Option<f64>,
    pub min_confidence: f64,
    /// Parameters for the secondary call (model, temperature, ...).
    pub parameters: Map<String, Value>,
}

impl Default for AiAssistedParams {
    fn default() -> Self {
        Self {
            task_prompt_template: None,
            required_tools: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            timeout_secs: Some(60.0),
            min_confidence: 0.0,
            parameters: Map::new(),
        }
    }
}

/// Structured verdict the secondary call must return.
#[derive(Debug, Clone, Deserialize)]
struct Verdict {
    valid: bool,
    explanation: String,
    confidence: f64,
}

pub struct AiAssistedValidator {
    name: String,
    caller: Arc<dyn LlmCaller>,
    task_prompt_template: String,
    required_tools: BTreeSet<String>,
    max_depth: u32,
    timeout: Option<Duration>,
    min_confidence: f64,
    parameters: Map<String, Value>,
}

impl AiAssistedValidator {
    /// Create a validator; the template is syntax-checked here.
    pub fn new(
        name: impl Into<String>,
        caller: Arc<dyn LlmCaller>,
        task_prompt_template: impl Into<String>,
    ) -> Result<Self> {
        let task_prompt_template = task_prompt_template.into();
        Environment::new()
            .template_from_str(&task_prompt_template)
            .context("parse task prompt template")?;
        Ok(Self {
            name: name.into(),
            caller,
            task_prompt_template,
            required_tools: BTreeSet::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            timeout: None,
            min_confidence: 0.0,
            parameters: Map::new(),
        })
    }

    pub fn with_required_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Build from registry parameters (see [`AiAssistedParams`]).
    pub fn from_params(
        name: impl Into<String>,
        caller: Arc<dyn LlmCaller>,
        params: &Value,
    ) -> Result<Self> {
        let params: AiAssistedParams = if params.is_null() {
            AiAssistedParams::default()
        } else {
            serde_json::from_value(params.clone()).context("parse ai-assisted params")?
        };
        if !(0.0..=1.0).contains(&params.min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within 0.0..=1.0 (got {})",
                params.min_confidence
            ));
        }
        let template = params
            .task_prompt_template
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        let mut validator = Self::new(name, caller, template)?
            .with_required_tools(params.required_tools)
            .with_max_depth(params.max_depth)
            .with_min_confidence(params.min_confidence)
            .with_parameters(params.parameters);
        if let Some(secs) = params.timeout_secs {
            let timeout = Duration::try_from_secs_f64(secs)
                .ok()
                .filter(|t| !t.is_zero())
                .ok_or_else(|| anyhow!("timeout_secs must be > 0 (got {secs})"))?;
            validator = validator.with_timeout(timeout);
        }
        Ok(validator)
    }

    /// Registry factory that builds validators named `name` around `caller`.
    pub fn factory(name: impl Into<String>, caller: Arc<dyn LlmCaller>) -> ValidatorFactory {
        let name = name.into();
        registry::factory(move |params| {
            Ok(Validator::ai_assisted(Self::from_params(
                name.clone(),
                Arc::clone(&caller),
                params,
            )?))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required_tools(&self) -> &BTreeSet<String> {
        &self.required_tools
    }

    #[instrument(
        skip_all,
        fields(validator = %self.name, attempt = ctx.attempt, depth = ctx.depth)
    )]
    pub async fn validate(
        &self,
        response: &LlmResponse,
        ctx: &ValidationContext<'_>,
    ) -> ValidationResult {
        if let Some(refusal) = self.check_tools(ctx) {
            return refusal;
        }
        if ctx.depth >= self.max_depth {
            debug!(max_depth = self.max_depth, "refusing nested validator call");
            return recursion_limit(ctx.depth, self.max_depth);
        }

        let prompt = match self.render_prompt(response, ctx) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(error = %err, "task prompt rendering failed");
                return ValidationResult::fail(
                    ErrorDetail::new(
                        kinds::VALIDATOR_CALL_FAILED,
                        format!("could not render validator prompt: {err:#}"),
                    )
                    .with_field("reason", "prompt_render"),
                );
            }
        };

        let request = LlmRequest {
            messages: vec![Message::user(prompt)],
            parameters: self.parameters.clone(),
            tools: self.attachable_tools(ctx.tools),
        };
        let call_ctx = CallContext {
            depth: ctx.depth + 1,
            timeout: self.timeout,
            cancel: ctx.cancel.clone(),
        };

        match call_with_limits(self.caller.as_ref(), request, &call_ctx).await {
            Ok(secondary) => self.interpret(&secondary),
            Err(TransportError::RecursionLimit { depth }) => {
                recursion_limit(depth, self.max_depth)
            }
            Err(err) => {
                warn!(error = %err, "validator call failed");
                let reason = match err {
                    TransportError::Timeout(_) => "timeout",
                    TransportError::Cancelled => "cancelled",
                    _ => "transport",
                };
                ValidationResult::fail(
                    ErrorDetail::new(
                        kinds::VALIDATOR_CALL_FAILED,
                        format!("validator call failed: {err}"),
                    )
                    .with_field("reason", reason),
                )
            }
        }
    }

    fn check_tools(&self, ctx: &ValidationContext<'_>) -> Option<ValidationResult> {
        if self.required_tools.is_empty() {
            return None;
        }
        if ctx.stage < Stage::ToolAssisted {
            return Some(ValidationResult::fail(
                ErrorDetail::new(
                    kinds::TOOLS_NOT_YET_AVAILABLE,
                    "validator needs tools that are not attached before the tool-assisted stage",
                )
                .with_field("required_tools", self.required_tools_list())
                .with_field("stage", ctx.stage.as_str()),
            ));
        }
        let attached: BTreeSet<&str> = ctx.tools.iter().map(|t| t.name.as_str()).collect();
        let missing: Vec<String> = self
            .required_tools
            .iter()
            .filter(|name| !attached.contains(name.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return None;
        }
        Some(ValidationResult::fail(
            ErrorDetail::new(
                kinds::REQUIRED_TOOLS_MISSING,
                format!("required tools are not configured: {}", missing.join(", ")),
            )
            .with_field("missing", missing),
        ))
    }

    fn required_tools_list(&self) -> Vec<String> {
        self.required_tools.iter().cloned().collect()
    }

    fn attachable_tools(&self, tools: &[ToolDescriptor]) -> Option<Vec<ToolDescriptor>> {
        if self.required_tools.is_empty() {
            return None;
        }
        let selected: Vec<ToolDescriptor> = tools
            .iter()
            .filter(|tool| self.required_tools.contains(&tool.name))
            .cloned()
            .collect();
        (!selected.is_empty()).then_some(selected)
    }

    fn render_prompt(&self, response: &LlmResponse, ctx: &ValidationContext<'_>) -> Result<String> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        let original = ctx.original_request;
        let tools: Vec<&str> = ctx
            .tools
            .iter()
            .filter(|tool| self.required_tools.contains(&tool.name))
            .map(|tool| tool.name.as_str())
            .collect();
        let rendered = env.render_str(
            &self.task_prompt_template,
            context! {
                response => response.content.trim(),
                question => original.last_user_message().unwrap_or_default().trim(),
                system => original.system_message().unwrap_or_default().trim(),
                conversation => &original.messages,
                parameters => &original.parameters,
                tools => tools,
                attempt => ctx.attempt,
                stage => ctx.stage.as_str(),
            },
        )?;
        Ok(rendered)
    }

    fn interpret(&self, secondary: &LlmResponse) -> ValidationResult {
        let verdict = match parse_verdict(&secondary.content) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(error = %err, "validator response unparseable");
                return ValidationResult::fail(
                    ErrorDetail::new(
                        kinds::VALIDATOR_RESPONSE_UNPARSEABLE,
                        format!("validator response could not be parsed: {err:#}"),
                    )
                    .with_field("raw", truncate(&secondary.content, 500)),
                );
            }
        };
        debug!(
            valid = verdict.valid,
            confidence = verdict.confidence,
            "validator verdict"
        );

        if !verdict.valid {
            return ValidationResult::fail(
                ErrorDetail::new(kinds::JUDGED_INVALID, verdict.explanation.clone())
                    .with_field("confidence", verdict.confidence),
            )
            .with_suggestion(verdict.explanation);
        }
        if verdict.confidence < self.min_confidence {
            return ValidationResult::fail(
                ErrorDetail::new(
                    kinds::LOW_CONFIDENCE,
                    format!(
                        "reviewer accepted the answer with confidence {} below the required {}",
                        verdict.confidence, self.min_confidence
                    ),
                )
                .with_field("confidence", verdict.confidence)
                .with_field("min_confidence", self.min_confidence),
            )
            .with_suggestion("Support the answer with more specific, verifiable details.");
        }
        ValidationResult::pass()
    }
}

impl fmt::Debug for AiAssistedValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiAssistedValidator")
            .field("name", &self.name)
            .field("required_tools", &self.required_tools)
            .field("max_depth", &self.max_depth)
            .field("timeout", &self.timeout)
            .field("min_confidence", &self.min_confidence)
            .finish_non_exhaustive()
    }
}

fn parse_verdict(content: &str) -> Result<Verdict> {
    let value = extract_json(content).context("parse verdict json")?;
    let verdict: Verdict = serde_json::from_value(value).context("verdict shape")?;
    if !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(anyhow!(
            "confidence {} outside 0.0..=1.0",
            verdict.confidence
        ));
    }
    Ok(verdict)
}

fn recursion_limit(depth: u32, max_depth: u32) -> ValidationResult {
    ValidationResult::fail(
        ErrorDetail::new(
            kinds::RECURSION_LIMIT_EXCEEDED,
            format!("validator call depth {depth} reached the limit of {max_depth}"),
        )
        .with_field("depth", depth)
        .with_field("max_depth", max_depth),
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}[truncated]", &text[..idx]),
        None => text.to_string(),
    }
}
