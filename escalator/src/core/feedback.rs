//! Corrective feedback rendered from accumulated validation failures.
//!
//! Output is a pure function of its inputs: no timestamps, no randomness, and
//! the full failure history is always included so the model can see repeated
//! mistakes.

use crate::core::attempt::AttemptFailure;
use crate::core::retry_config::Stage;
use crate::core::types::ToolDescriptor;

const HEADER: &str =
    "Your previous answer did not pass validation. Fix every issue listed below and answer again.";

/// Render the feedback message for the next attempt.
///
/// Returns an empty string when there is no failure history.
pub fn build_feedback(errors: &[AttemptFailure], stage: Stage, tools: &[ToolDescriptor]) -> String {
    if errors.is_empty() {
        return String::new();
    }

    let mut ordered: Vec<&AttemptFailure> = errors.iter().collect();
    ordered.sort_by_key(|failure| failure.attempt);

    let mut lines = vec![HEADER.to_string(), String::new()];
    for failure in ordered {
        lines.push(format!(
            "- Attempt {} ({}): {}",
            failure.attempt,
            failure.validator,
            single_line(failure.result.message())
        ));
        for suggestion in failure.result.suggestions() {
            lines.push(format!("  Suggestion: {}", single_line(suggestion)));
        }
    }

    if stage == Stage::ToolAssisted && !tools.is_empty() {
        let names = tools
            .iter()
            .map(|tool| tool.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(String::new());
        lines.push(format!(
            "You now have access to these tools: {names}. Use them to verify your answer before responding."
        ));
    }

    lines.join("\n")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
