//! Built-in deterministic validators.
//!
//! JSON-oriented checks assume nothing about earlier validators but report
//! `not_json` themselves, so listing `json` first only improves feedback.

use std::fmt;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde_json::Value;

use crate::core::json::extract_json;
use crate::core::types::LlmResponse;
use crate::core::validation::{ErrorDetail, ValidationResult, kinds};
use crate::validators::DeterministicCheck;

/// Fails on blank output.
#[derive(Debug, Clone, Default)]
pub struct NonEmpty;

impl DeterministicCheck for NonEmpty {
    fn name(&self) -> &str {
        "non_empty"
    }

    fn check(&self, response: &LlmResponse) -> ValidationResult {
        if response.content.trim().is_empty() {
            return ValidationResult::fail(ErrorDetail::new(
                kinds::EMPTY_RESPONSE,
                "response was empty",
            ))
            .with_suggestion("Answer the question; do not return an empty message.");
        }
        ValidationResult::pass()
    }
}

/// Requires the response to parse as JSON (a surrounding code fence is tolerated).
#[derive(Debug, Clone, Default)]
pub struct IsJson;

impl DeterministicCheck for IsJson {
    fn name(&self) -> &str {
        "json"
    }

    fn check(&self, response: &LlmResponse) -> ValidationResult {
        match extract_json(&response.content) {
            Ok(_) => ValidationResult::pass(),
            Err(err) => not_json(&err),
        }
    }
}

/// Requires a JSON object with the listed top-level fields present and non-null.
#[derive(Debug, Clone)]
pub struct RequiredFields {
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new(fields: Vec<String>) -> Result<Self> {
        if fields.is_empty() {
            return Err(anyhow!("required_fields needs at least one field"));
        }
        if let Some(blank) = fields.iter().find(|f| f.trim().is_empty()) {
            return Err(anyhow!("required_fields contains a blank field name {blank:?}"));
        }
        Ok(Self { fields })
    }
}

impl DeterministicCheck for RequiredFields {
    fn name(&self) -> &str {
        "required_fields"
    }

    fn check(&self, response: &LlmResponse) -> ValidationResult {
        let value = match extract_json(&response.content) {
            Ok(value) => value,
            Err(err) => return not_json(&err),
        };
        let Some(object) = value.as_object() else {
            return ValidationResult::fail(
                ErrorDetail::new(kinds::MISSING_FIELDS, "expected a JSON object")
                    .with_field("missing", self.fields.clone()),
            )
            .with_suggestion("Return a single JSON object, not an array or scalar.");
        };

        let missing: Vec<String> = self
            .fields
            .iter()
            .filter(|field| object.get(field.as_str()).is_none_or(Value::is_null))
            .cloned()
            .collect();
        if missing.is_empty() {
            return ValidationResult::pass();
        }

        let list = missing.join(", ");
        ValidationResult::fail(
            ErrorDetail::new(
                kinds::MISSING_FIELDS,
                format!("missing required fields: {list}"),
            )
            .with_field("missing", missing),
        )
        .with_suggestion(format!("Include non-null values for: {list}."))
    }
}

/// Validates the response against a JSON Schema.
pub struct JsonSchemaCheck {
    compiled: jsonschema::Validator,
}

impl JsonSchemaCheck {
    pub fn new(schema: &Value) -> Result<Self> {
        let compiled =
            jsonschema::validator_for(schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
        Ok(Self { compiled })
    }
}

impl fmt::Debug for JsonSchemaCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaCheck").finish_non_exhaustive()
    }
}

impl DeterministicCheck for JsonSchemaCheck {
    fn name(&self) -> &str {
        "json_schema"
    }

    fn check(&self, response: &LlmResponse) -> ValidationResult {
        let value = match extract_json(&response.content) {
            Ok(value) => value,
            Err(err) => return not_json(&err),
        };
        let errors: Vec<String> = self
            .compiled
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if errors.is_empty() {
            return ValidationResult::pass();
        }

        let mut result = ValidationResult::fail(
            ErrorDetail::new(
                kinds::SCHEMA_VIOLATION,
                format!("schema validation failed: {}", errors.join("; ")),
            )
            .with_field("errors", errors.clone()),
        );
        for err in errors.iter().take(3) {
            result = result.with_suggestion(format!("Fix: {err}"));
        }
        result
    }
}

/// Requires the response to match (or, with `must_match = false`, not match) a regex.
#[derive(Debug, Clone)]
pub struct PatternCheck {
    regex: Regex,
    must_match: bool,
}

impl PatternCheck {
    pub fn new(pattern: &str, must_match: bool) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|err| anyhow!("invalid pattern: {err}"))?;
        Ok(Self { regex, must_match })
    }
}

impl DeterministicCheck for PatternCheck {
    fn name(&self) -> &str {
        "regex"
    }

    fn check(&self, response: &LlmResponse) -> ValidationResult {
        let matched = self.regex.is_match(&response.content);
        if matched == self.must_match {
            return ValidationResult::pass();
        }

        let pattern = self.regex.as_str();
        let (message, suggestion) = if self.must_match {
            (
                format!("response does not match required pattern `{pattern}`"),
                format!("Format the answer so it matches `{pattern}`."),
            )
        } else {
            (
                format!("response matches forbidden pattern `{pattern}`"),
                format!("Remove any text matching `{pattern}`."),
            )
        };
        ValidationResult::fail(
            ErrorDetail::new(kinds::PATTERN_MISMATCH, message)
                .with_field("pattern", pattern)
                .with_field("must_match", self.must_match),
        )
        .with_suggestion(suggestion)
    }
}

/// Limits the response length in characters.
#[derive(Debug, Clone)]
pub struct MaxLength {
    max_chars: usize,
}

impl MaxLength {
    pub fn new(max_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(anyhow!("max_chars must be > 0"));
        }
        Ok(Self { max_chars })
    }
}

impl DeterministicCheck for MaxLength {
    fn name(&self) -> &str {
        "max_length"
    }

    fn check(&self, response: &LlmResponse) -> ValidationResult {
        let length = response.content.chars().count();
        if length <= self.max_chars {
            return ValidationResult::pass();
        }
        ValidationResult::fail(
            ErrorDetail::new(
                kinds::TOO_LONG,
                format!(
                    "response has {length} characters, limit is {}",
                    self.max_chars
                ),
            )
            .with_field("length", length)
            .with_field("max_chars", self.max_chars),
        )
        .with_suggestion(format!(
            "Shorten the answer to at most {} characters.",
            self.max_chars
        ))
    }
}

type CheckFn = dyn Fn(&LlmResponse) -> ValidationResult + Send + Sync;

/// Deterministic check backed by a closure, for application-specific rules.
pub struct FnCheck {
    name: String,
    check: Box<CheckFn>,
}

impl FnCheck {
    pub fn new(
        name: impl Into<String>,
        check: impl Fn(&LlmResponse) -> ValidationResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

impl fmt::Debug for FnCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCheck").field("name", &self.name).finish()
    }
}

impl DeterministicCheck for FnCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, response: &LlmResponse) -> ValidationResult {
        (self.check)(response)
    }
}

fn not_json(err: &serde_json::Error) -> ValidationResult {
    ValidationResult::fail(
        ErrorDetail::new(kinds::NOT_JSON, format!("response is not valid JSON: {err}"))
            .with_field("line", err.line())
            .with_field("column", err.column()),
    )
    .with_suggestion("Respond with only a JSON document and no surrounding prose.")
}
