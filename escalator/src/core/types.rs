//! Shared request/response types passed between the orchestrator and callers.
//!
//! These types carry no behavior beyond construction helpers. They must stay
//! deterministic (ordered maps only) so identical runs serialize identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// An opaque, externally defined tool made available to a downstream call.
///
/// The engine never interprets `invocation` or `env`; it only decides whether
/// a set of descriptors is attached to an outgoing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub invocation: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Request handed to an [`LlmCaller`](crate::caller::LlmCaller).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDescriptor>>,
}

impl LlmRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            parameters: Map::new(),
            tools: None,
        }
    }

    /// Set a request parameter (model, temperature, ...).
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Content of the most recent user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Content of the first system message, if any.
    pub fn system_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
}

impl LlmResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_user_message_skips_assistant_turns() {
        let request = LlmRequest::new(vec![
            Message::system("be terse"),
            Message::user("first"),
            Message::assistant("answer"),
            Message::user("second"),
            Message::assistant("answer again"),
        ]);
        assert_eq!(request.last_user_message(), Some("second"));
        assert_eq!(request.system_message(), Some("be terse"));
    }

    #[test]
    fn request_without_tools_omits_field() {
        let request = LlmRequest::new(vec![Message::user("hi")]).with_parameter("model", "m");
        let json = serde_json::to_value(&request).expect("serialize");
        assert!(json.get("tools").is_none());
        assert_eq!(json["parameters"]["model"], "m");
    }
}
