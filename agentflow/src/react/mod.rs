//! ReAct driver: the think → act → observe loop. A think/act/observe node trio and an
//! invoke/stream runner split, collapsed from a compiled state graph into one driver loop since
//! this crate does not carry a graph engine.

mod assembler;

pub use assembler::ToolCallAssembler;

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::executor::{execute_one, ExecContext, RetryConfig};
use crate::llm::{tool_calls_from_message, ChatRequest, FinishReason, LlmClient, LlmUsage};
use crate::message::Message;
use crate::policy::{cost::CostRecord, PermissionContext, PolicyEngine};
use crate::tool::{ToolCall, ToolResult};

#[derive(Debug, Error)]
pub enum ReactError {
    #[error("llm transport error: {0}")]
    Llm(String),
    #[error("llm returned no choices")]
    EmptyResponse,
}

/// Why the loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced a final answer with no further tool calls.
    Finished,
    /// `max_iterations` was reached before the model stopped requesting tools.
    MaxIterationsReached,
    /// A tool call failed and `stop_on_error` is set.
    ErrorStopped,
}

#[derive(Clone, Debug)]
pub struct ReactConfig {
    pub model: String,
    pub system_prompt: Option<String>,
    pub max_iterations: u32,
    pub stop_on_error: bool,
    pub retry: RetryConfig,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self { model: "default".to_string(), system_prompt: None, max_iterations: 10, stop_on_error: false, retry: RetryConfig::default() }
    }
}

#[derive(Debug)]
pub struct ReactOutcome {
    pub messages: Vec<Message>,
    pub final_message: Message,
    pub iterations: u32,
    pub usage: LlmUsage,
    pub stopped: StopReason,
}

/// One observable moment in a streamed ReAct run.
#[derive(Clone, Debug)]
pub enum ReactEvent {
    IterationStarted { iteration: u32 },
    MessageDelta { content: String },
    ToolCallDetected { call: ToolCall },
    ToolResult { result: ToolResult },
    Usage { usage: LlmUsage },
    Done { stopped: StopReason },
}

/// Drives the think → act → observe loop to completion, optionally gated by a [`PolicyEngine`]
/// before each tool call executes.
pub struct ReactDriver {
    llm: std::sync::Arc<dyn LlmClient>,
    policy: Option<std::sync::Arc<PolicyEngine>>,
    config: ReactConfig,
}

impl ReactDriver {
    pub fn new(llm: std::sync::Arc<dyn LlmClient>, config: ReactConfig) -> Self {
        Self { llm, policy: None, config }
    }

    pub fn with_policy(mut self, policy: std::sync::Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    fn initial_messages(&self, user_message: &str) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(system_prompt) = &self.config.system_prompt {
            messages.push(Message::system(system_prompt.clone()));
        }
        messages.push(Message::user(user_message));
        messages
    }

    /// One full run to completion, blocking until `stopped`.
    pub async fn run(&self, ctx: &ExecContext, agent_id: &str, user_message: &str) -> Result<ReactOutcome, ReactError> {
        let mut messages = self.initial_messages(user_message);
        let mut usage = LlmUsage::default();
        let mut iteration = 0u32;

        loop {
            iteration += 1;
            if iteration > self.config.max_iterations {
                let final_message = messages.last().cloned().unwrap_or_else(|| Message::assistant(""));
                return Ok(ReactOutcome { messages, final_message, iterations: iteration - 1, usage, stopped: StopReason::MaxIterationsReached });
            }

            let request = ChatRequest::new(self.config.model.clone(), messages.clone()).with_tools(ctx.registry.list());
            let response = self.llm.completion(&request).await.map_err(|e| ReactError::Llm(e.to_string()))?;
            if let Some(u) = response.usage {
                usage = usage.add(u);
            }
            let choice = response.first_choice().ok_or(ReactError::EmptyResponse)?.clone();
            messages.push(choice.message.clone());

            let tool_calls = tool_calls_from_message(&choice.message);
            if tool_calls.is_empty() || choice.finish_reason != FinishReason::ToolCalls {
                return Ok(ReactOutcome { messages, final_message: choice.message, iterations: iteration, usage, stopped: StopReason::Finished });
            }

            // All tool calls in one iteration execute concurrently; `stop_on_error` is evaluated
            // once against the whole batch, not per call (the algorithm runs
            // `executor.execute(ctx, tool_calls)` as a single batch).
            let results = futures::future::join_all(tool_calls.iter().map(|call| self.act(ctx, agent_id, call))).await;
            let mut last_message = messages.last().cloned().unwrap_or_else(|| Message::assistant(""));
            for result in &results {
                let tool_message = Message::tool_result(result);
                messages.push(tool_message.clone());
                last_message = tool_message;
            }
            if self.config.stop_on_error && results.iter().any(ToolResult::is_error) {
                return Ok(ReactOutcome { messages, final_message: last_message, iterations: iteration, usage, stopped: StopReason::ErrorStopped });
            }
        }
    }

    /// Streaming variant: emits [`ReactEvent`]s as the loop progresses, returning the final
    /// outcome once the channel's receiver side is exhausted.
    pub async fn run_stream(&self, ctx: &ExecContext, agent_id: &str, user_message: &str, events: mpsc::Sender<ReactEvent>) -> Result<ReactOutcome, ReactError> {
        let mut messages = self.initial_messages(user_message);
        let mut usage = LlmUsage::default();
        let mut iteration = 0u32;

        loop {
            iteration += 1;
            let _ = events.send(ReactEvent::IterationStarted { iteration }).await;
            if iteration > self.config.max_iterations {
                let final_message = messages.last().cloned().unwrap_or_else(|| Message::assistant(""));
                let _ = events.send(ReactEvent::Done { stopped: StopReason::MaxIterationsReached }).await;
                return Ok(ReactOutcome { messages, final_message, iterations: iteration - 1, usage, stopped: StopReason::MaxIterationsReached });
            }

            let request = ChatRequest::new(self.config.model.clone(), messages.clone()).with_tools(ctx.registry.list());
            let mut chunk_rx = self.llm.stream(&request).await.map_err(|e| ReactError::Llm(e.to_string()))?;

            let mut content = String::new();
            let mut assembler = ToolCallAssembler::new();
            let mut finish_reason = FinishReason::Stop;
            while let Some(chunk) = chunk_rx.recv().await {
                if let Some(delta_content) = &chunk.delta.content {
                    content.push_str(delta_content);
                    let _ = events.send(ReactEvent::MessageDelta { content: delta_content.clone() }).await;
                }
                for fragment in &chunk.delta.tool_calls {
                    assembler.push(fragment);
                }
                if let Some(reason) = chunk.finish_reason {
                    finish_reason = reason;
                }
                if let Some(u) = chunk.usage {
                    usage = usage.add(u);
                    let _ = events.send(ReactEvent::Usage { usage }).await;
                }
            }

            let tool_calls = assembler.finish();
            let message = if tool_calls.is_empty() {
                Message::assistant(content)
            } else {
                Message::assistant_with_tool_calls(content, tool_calls.clone())
            };
            messages.push(message.clone());

            if tool_calls.is_empty() || finish_reason != FinishReason::ToolCalls {
                let _ = events.send(ReactEvent::Done { stopped: StopReason::Finished }).await;
                return Ok(ReactOutcome { messages, final_message: message, iterations: iteration, usage, stopped: StopReason::Finished });
            }

            for call in &tool_calls {
                let _ = events.send(ReactEvent::ToolCallDetected { call: call.clone() }).await;
                let result = self.act(ctx, agent_id, call).await;
                let _ = events.send(ReactEvent::ToolResult { result: result.clone() }).await;
                let stop = result.is_error() && self.config.stop_on_error;
                let final_message = Message::tool_result(&result);
                messages.push(final_message.clone());
                if stop {
                    let _ = events.send(ReactEvent::Done { stopped: StopReason::ErrorStopped }).await;
                    return Ok(ReactOutcome { messages, final_message, iterations: iteration, usage, stopped: StopReason::ErrorStopped });
                }
            }
        }
    }

    /// Runs one tool call through the policy gate (if configured) then the executor,
    /// recording actual cost on success.
    async fn act(&self, ctx: &ExecContext, agent_id: &str, call: &ToolCall) -> ToolResult {
        if let Some(policy) = &self.policy {
            let mut pctx = PermissionContext::new(agent_id, call.name.clone());
            pctx.arguments = call.arguments.clone();
            let verdict = policy.check(&pctx, call).await;
            if !verdict.allowed {
                return ToolResult::err(call.id.clone(), call.name.clone(), verdict.reason, Duration::ZERO);
            }
            let result = execute_one(ctx, call, self.config.retry).await;
            if !result.is_error() {
                policy
                    .cost
                    .record_cost(CostRecord {
                        id: call.id.clone(),
                        timestamp: Utc::now(),
                        agent_id: agent_id.to_string(),
                        user_id: String::new(),
                        session_id: String::new(),
                        tool_name: call.name.clone(),
                        cost: verdict.estimated_cost,
                        unit: "credits".to_string(),
                    })
                    .await;
            }
            self.audit_tool_call(policy, agent_id, call, &result).await;
            result
        } else {
            execute_one(ctx, call, self.config.retry).await
        }
    }

    /// Records a `tool_call` audit entry after invocation, carrying arguments, result-or-error,
    /// and duration (an `audit_middleware`-style wrapper). Uses the non-blocking async queue so a slow or
    /// full audit sink never delays the ReAct loop.
    async fn audit_tool_call(&self, policy: &PolicyEngine, agent_id: &str, call: &ToolCall, result: &ToolResult) {
        let mut entry = crate::policy::AuditEntry::new(
            agent_id.to_string(),
            call.name.clone(),
            crate::policy::AuditAction::ToolCall,
            if result.is_error() { "error" } else { "ok" },
        )
        .with_duration(result.duration);
        entry.arguments = call.arguments.clone();
        entry.result = result.result.clone();
        entry.error = result.error.clone();
        policy.audit.log_async(entry).await;
    }
}
