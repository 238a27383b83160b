//! Validation verdicts produced per validator per attempt.

use serde::Serialize;
use serde_json::{Map, Value};

/// Stable `error_detail.kind` values produced by the engine and built-in validators.
pub mod kinds {
    pub const EMPTY_RESPONSE: &str = "empty_response";
    pub const NOT_JSON: &str = "not_json";
    pub const MISSING_FIELDS: &str = "missing_fields";
    pub const SCHEMA_VIOLATION: &str = "schema_violation";
    pub const PATTERN_MISMATCH: &str = "pattern_mismatch";
    pub const TOO_LONG: &str = "too_long";
    pub const JUDGED_INVALID: &str = "judged_invalid";
    pub const LOW_CONFIDENCE: &str = "low_confidence";

    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const TIMEOUT: &str = "timeout";
    pub const VALIDATOR_CALL_FAILED: &str = "validator_call_failed";
    pub const VALIDATOR_RESPONSE_UNPARSEABLE: &str = "validator_response_unparseable";
    pub const RECURSION_LIMIT_EXCEEDED: &str = "recursion_limit_exceeded";
    pub const TOOLS_NOT_YET_AVAILABLE: &str = "tools_not_yet_available";
    pub const REQUIRED_TOOLS_MISSING: &str = "required_tools_missing";

    /// Kinds meaning the machinery broke, not that the target model answered badly.
    pub const INFRASTRUCTURE: &[&str] = &[
        TRANSPORT_ERROR,
        TIMEOUT,
        VALIDATOR_CALL_FAILED,
        VALIDATOR_RESPONSE_UNPARSEABLE,
        RECURSION_LIMIT_EXCEEDED,
        TOOLS_NOT_YET_AVAILABLE,
        REQUIRED_TOOLS_MISSING,
    ];
}

/// Structured failure detail: a stable `kind`, a human-readable message, and
/// optional machine-readable fields (missing keys, parse offsets, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl ErrorDetail {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_infrastructure(&self) -> bool {
        kinds::INFRASTRUCTURE.contains(&self.kind.as_str())
    }
}

/// Pass/fail verdict of one validator.
///
/// A passing result never carries detail or suggestions; the constructors are
/// the only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_detail: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    suggestions: Vec<String>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            valid: true,
            error_detail: None,
            suggestions: Vec::new(),
        }
    }

    pub fn fail(detail: ErrorDetail) -> Self {
        Self {
            valid: false,
            error_detail: Some(detail),
            suggestions: Vec::new(),
        }
    }

    /// Append a corrective hint. Ignored on passing results.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        if !self.valid {
            self.suggestions.push(suggestion.into());
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn error_detail(&self) -> Option<&ErrorDetail> {
        self.error_detail.as_ref()
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// `error_detail.kind`, if the result failed.
    pub fn kind(&self) -> Option<&str> {
        self.error_detail.as_ref().map(|d| d.kind.as_str())
    }

    /// One-line description used in feedback and logs.
    pub fn message(&self) -> &str {
        match &self.error_detail {
            Some(detail) if !detail.message.trim().is_empty() => detail.message.trim(),
            Some(detail) => detail.kind.as_str(),
            None => "passed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passing_result_drops_suggestions() {
        let result = ValidationResult::pass().with_suggestion("ignored");
        assert!(result.is_valid());
        assert!(result.error_detail().is_none());
        assert!(result.suggestions().is_empty());
    }

    #[test]
    fn failing_result_keeps_detail_and_suggestions_in_order() {
        let result = ValidationResult::fail(
            ErrorDetail::new(kinds::MISSING_FIELDS, "missing fields: year")
                .with_field("missing", vec!["year"]),
        )
        .with_suggestion("add year")
        .with_suggestion("return JSON only");

        assert!(!result.is_valid());
        assert_eq!(result.kind(), Some(kinds::MISSING_FIELDS));
        assert_eq!(result.message(), "missing fields: year");
        assert_eq!(result.suggestions(), ["add year", "return JSON only"]);
    }

    #[test]
    fn message_falls_back_to_kind() {
        let result = ValidationResult::fail(ErrorDetail::new(kinds::TIMEOUT, "  "));
        assert_eq!(result.message(), "timeout");
    }

    #[test]
    fn infrastructure_kinds_are_distinguished() {
        assert!(ErrorDetail::new(kinds::VALIDATOR_RESPONSE_UNPARSEABLE, "x").is_infrastructure());
        assert!(ErrorDetail::new(kinds::TRANSPORT_ERROR, "x").is_infrastructure());
        assert!(!ErrorDetail::new(kinds::JUDGED_INVALID, "x").is_infrastructure());
        assert!(!ErrorDetail::new("custom_kind", "x").is_infrastructure());
    }
}
