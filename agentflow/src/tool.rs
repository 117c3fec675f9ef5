//! Tool-call wire shapes shared by the registry, executor, and ReAct driver.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A tool invocation requested by the LLM.
///
/// `arguments` is kept as the raw JSON text the LLM produced (or the reassembled streamed
/// text) rather than a parsed `Value` — the system never inspects the payload beyond
/// validating that it parses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Outcome of executing one [`ToolCall`]. Exactly one of `result`/`error` is informative.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub duration: Duration,
    #[serde(default)]
    pub from_cache: bool,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, name: impl Into<String>, result: impl Into<String>, duration: Duration) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            result: result.into(),
            error: String::new(),
            duration,
            from_cache: false,
        }
    }

    pub fn err(tool_call_id: impl Into<String>, name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            result: String::new(),
            error: error.into(),
            duration,
            from_cache: false,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// JSON-Schema-shaped tool schema exposed to the LLM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-Schema object describing the `arguments` payload.
    pub parameters: serde_json::Value,
}

/// Streaming progress for one in-flight tool call (ordering: progress → output → complete).
#[derive(Clone, Debug)]
pub enum ToolStreamEvent {
    Progress { tool_call_id: String, name: String },
    Output { tool_call_id: String, name: String, data: String },
    Complete { result: ToolResult },
    Error { tool_call_id: String, name: String, error: String },
}
