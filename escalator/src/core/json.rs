//! Lenient JSON extraction from model output.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("fence regex is valid")
});

/// Strip a single surrounding Markdown code fence, if present.
pub fn strip_code_fence(content: &str) -> &str {
    match FENCE_RE.captures(content).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str(),
        None => content.trim(),
    }
}

/// Parse model output as JSON, tolerating a surrounding code fence.
pub fn extract_json(content: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(strip_code_fence(content))
}
