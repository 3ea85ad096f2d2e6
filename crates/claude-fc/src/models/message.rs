use super::role::Role;
use super::tool::ToolCall;
use chrono::Utc;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Option<String>,
    /// Calls recovered from the markup in `content`, assistant messages only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on messages that carry the result of a function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metrics: HashMap<String, f64>,
}

impl Message {
    pub fn new(role: Role, content: Option<String>) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content,
            tool_calls: None,
            tool_call_name: None,
            metrics: HashMap::new(),
        }
    }

    /// Create a new system message with the current timestamp
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, Some(content.into()))
    }

    /// Create a new user message with the current timestamp
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    /// An assistant message whose completion carried no text at all
    pub fn empty_assistant() -> Self {
        Self::new(Role::Assistant, None)
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    pub fn with_tool_call_name<S: Into<String>>(mut self, name: S) -> Self {
        self.tool_call_name = Some(name.into());
        self
    }

    pub fn with_metric<S: Into<String>>(mut self, key: S, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Tool calls, treating an empty list the same as none
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    /// The content as a string, empty when there is none
    pub fn content_string(&self) -> String {
        self.content.clone().unwrap_or_default()
    }

    pub fn log(&self) {
        tracing::debug!("============== {} ==============", self.role);
        if let Some(name) = &self.tool_call_name {
            tracing::debug!("Tool call: {}", name);
        }
        if let Some(content) = &self.content {
            tracing::debug!("{}", content);
        }
        if let Some(tool_calls) = &self.tool_calls {
            tracing::debug!("Tool calls: {:?}", tool_calls);
        }
    }
}
