//! Tool-availability injection for tool-assisted attempts.

use crate::core::retry_config::Stage;
use crate::core::types::{LlmRequest, ToolDescriptor};

/// Return a copy of `request` with `tools` attached when `stage` is
/// [`Stage::ToolAssisted`] and at least one tool is configured; otherwise an
/// unchanged copy.
pub fn maybe_attach(request: &LlmRequest, stage: Stage, tools: &[ToolDescriptor]) -> LlmRequest {
    let mut outgoing = request.clone();
    if stage == Stage::ToolAssisted && !tools.is_empty() {
        outgoing.tools = Some(tools.to_vec());
    }
    outgoing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Message;
    use serde_json::json;

    fn tools() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor {
            name: "web_search".to_string(),
            invocation: json!({"command": "search-server", "args": ["--stdio"]}),
            env: [("API_KEY".to_string(), "secret".to_string())].into(),
        }]
    }

    #[test]
    fn basic_stage_leaves_request_unchanged() {
        let request = LlmRequest::new(vec![Message::user("q")]);
        assert_eq!(maybe_attach(&request, Stage::Basic, &tools()), request);
    }

    #[test]
    fn tool_stage_without_tools_leaves_request_unchanged() {
        let request = LlmRequest::new(vec![Message::user("q")]);
        assert_eq!(maybe_attach(&request, Stage::ToolAssisted, &[]), request);
    }

    #[test]
    fn tool_stage_attaches_descriptors_verbatim() {
        let request = LlmRequest::new(vec![Message::user("q")]);
        let attached = maybe_attach(&request, Stage::ToolAssisted, &tools());

        assert!(request.tools.is_none(), "input must not be mutated");
        assert_eq!(attached.tools, Some(tools()));
        assert_eq!(attached.messages, request.messages);
    }
}
