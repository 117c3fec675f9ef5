//! LLM provider contract: the only two operations AgentFlow consumes from a concrete
//! provider — `completion` and `stream`. Concrete providers are out of scope; this module
//! defines the trait, the wire-shaped request/response/chunk types, and a test double.

pub mod test_support;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolSchema};

/// Token usage counters for one LLM call.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl LlmUsage {
    pub fn add(self, other: LlmUsage) -> LlmUsage {
        LlmUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// Why a choice stopped generating.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    ToolCalls,
    Length,
    Other,
}

/// A request to the LLM provider: model, ordered messages, sampling knobs, and the tool
/// schemas the model may call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self { model: model.into(), messages, temperature: None, max_tokens: None, tools: Vec::new() }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }
}

/// One completion choice: an assistant message (possibly carrying tool calls) plus why it
/// stopped.
#[derive(Clone, Debug)]
pub struct ChatChoice {
    pub message: Message,
    pub finish_reason: FinishReason,
}

/// A completed LLM response.
#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<LlmUsage>,
}

impl ChatResponse {
    pub fn first_choice(&self) -> Option<&ChatChoice> {
        self.choices.first()
    }
}

/// One fragment of a tool call as it arrives in a stream, keyed by id so fragments across
/// chunks can be reassembled.
///
/// `arguments_fragment` may arrive two ways, and the reassembler must accept both without
/// guessing: `is_json_literal = true` means the fragment is the *decoded text* of a JSON
/// string literal the provider sent (i.e. the provider's wire payload itself was
/// `"{\"text\":\"h"`, already unescaped here); `false` means it is raw JSON bytes, which may be
/// a complete payload in one chunk.
#[derive(Clone, Debug, Default)]
pub struct ToolCallFragment {
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_fragment: String,
    pub is_json_literal: bool,
}

/// One delta in a streamed response: a content fragment and/or tool-call fragments.
#[derive(Clone, Debug, Default)]
pub struct ChatChunkDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
}

/// One chunk of a streamed completion.
#[derive(Clone, Debug, Default)]
pub struct ChatChunk {
    pub delta: ChatChunkDelta,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<LlmUsage>,
}

/// The external LLM provider contract. AgentFlow depends only on this trait; concrete
/// providers (OpenAI-compatible, etc.) are plug-ins outside this crate's scope.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn completion(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError>;

    async fn stream(&self, request: &ChatRequest) -> Result<tokio::sync::mpsc::Receiver<ChatChunk>, AgentError>;
}

/// Reassembles a completed, validated [`ToolCall`] from a message's already-final tool calls —
/// used when a non-streaming `Message::Assistant` already carries full tool calls.
pub fn tool_calls_from_message(message: &Message) -> Vec<ToolCall> {
    match message {
        Message::Assistant { tool_calls, .. } => tool_calls.clone(),
        _ => Vec::new(),
    }
}
