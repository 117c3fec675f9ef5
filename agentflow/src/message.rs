//! Chat message shapes for the LLM provider contract.

use serde::{Deserialize, Serialize};

/// One message in a conversation passed to the LLM.
///
/// Mirrors the external contract's `role ∈ {system, user, assistant, tool}`. `Tool` carries the
/// `tool_call_id` it answers, matching the ReAct driver's observation-message construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<crate::tool::ToolCall>,
    },
    Tool { tool_call_id: String, content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System { content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant { content: content.into(), tool_calls: Vec::new() }
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<crate::tool::ToolCall>,
    ) -> Self {
        Message::Assistant { content: content.into(), tool_calls }
    }

    /// Builds a tool-role observation message, prefixing tool errors with `"Error: "`.
    pub fn tool_result(result: &crate::tool::ToolResult) -> Self {
        let content = if result.error.is_empty() {
            result.result.clone()
        } else {
            format!("Error: {}", result.error)
        };
        Message::Tool { tool_call_id: result.tool_call_id.clone(), content }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::System { content } => content,
            Message::User { content } => content,
            Message::Assistant { content, .. } => content,
            Message::Tool { content, .. } => content,
        }
    }
}
