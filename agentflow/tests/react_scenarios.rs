//! Cross-module ReAct driver coverage: a full blocking two-turn loop (scenario D) and a
//! streamed tool-call reassembly loop (scenario E), driven against a real [`ToolRegistry`]
//! and [`ExecContext`] rather than mocked act() calls.

use std::sync::Arc;
use std::time::Duration;

use agentflow::llm::test_support::ScriptedLlm;
use agentflow::llm::{ChatChoice, ChatChunk, ChatChunkDelta, ChatResponse, FinishReason, ToolCallFragment};
use agentflow::registry::{ToolMeta, ToolRegistry};
use agentflow::tool::ToolSchema;
use agentflow::{ExecContext, Message, ReactConfig, ReactDriver, ToolCall};
use serde_json::json;

fn schema(name: &str) -> ToolSchema {
    ToolSchema { name: name.to_string(), description: String::new(), parameters: json!({}) }
}

fn registry_with_echo() -> Arc<ToolRegistry> {
    let registry = ToolRegistry::new();
    registry
        .register(
            "echo",
            Arc::new(|a: String| async move { Ok(a) }),
            ToolMeta::new(schema("echo")).with_timeout(Duration::from_secs(5)),
        )
        .unwrap();
    Arc::new(registry)
}

/// Scenario D: LLM turn 1 requests `echo`, turn 2 stops with content "done"; the driver
/// returns that content and a trace carrying both the tool call and its observation.
#[tokio::test]
async fn two_turn_blocking_loop_finishes_with_tool_observation_in_trace() {
    let call = ToolCall { id: "c1".into(), name: "echo".into(), arguments: "{\"ok\":true}".into() };
    let llm = Arc::new(
        ScriptedLlm::new()
            .with_response(ChatResponse {
                choices: vec![ChatChoice {
                    message: Message::assistant_with_tool_calls("", vec![call]),
                    finish_reason: FinishReason::ToolCalls,
                }],
                usage: None,
            })
            .with_response(ChatResponse {
                choices: vec![ChatChoice { message: Message::assistant("done"), finish_reason: FinishReason::Stop }],
                usage: None,
            }),
    );
    let driver = ReactDriver::new(llm, ReactConfig::default());
    let ctx = ExecContext::new(registry_with_echo());

    let outcome = driver.run(&ctx, "agent-1", "please echo").await.unwrap();

    assert_eq!(outcome.final_message.content(), "done");
    assert_eq!(outcome.iterations, 2);
    let tool_messages: Vec<_> = outcome.messages.iter().filter(|m| matches!(m, Message::Tool { .. })).collect();
    assert_eq!(tool_messages.len(), 1);
    assert_eq!(tool_messages[0].content(), "{\"ok\":true}");
}

/// Scenario E: a streamed tool call arrives as two argument fragments across two chunks; the
/// reassembled call must carry the concatenated, valid-JSON arguments, and a third streamed
/// iteration with plain content ends the loop on "done".
#[tokio::test]
async fn streamed_tool_call_reassembles_fragments_before_dispatch() {
    let registry = registry_with_echo();
    let llm = Arc::new(
        ScriptedLlm::new()
            .with_stream(vec![
                ChatChunk {
                    delta: ChatChunkDelta {
                        content: None,
                        tool_calls: vec![ToolCallFragment {
                            id: Some("c1".to_string()),
                            name: Some("echo".to_string()),
                            arguments_fragment: "{\"text\":\"h".to_string(),
                            is_json_literal: false,
                        }],
                    },
                    finish_reason: None,
                    usage: None,
                },
                ChatChunk {
                    delta: ChatChunkDelta {
                        content: None,
                        tool_calls: vec![ToolCallFragment {
                            id: None,
                            name: None,
                            arguments_fragment: "i\"}".to_string(),
                            is_json_literal: false,
                        }],
                    },
                    finish_reason: Some(FinishReason::ToolCalls),
                    usage: None,
                },
            ])
            .with_stream(vec![ChatChunk {
                delta: ChatChunkDelta { content: Some("done".to_string()), tool_calls: vec![] },
                finish_reason: Some(FinishReason::Stop),
                usage: None,
            }]),
    );
    let driver = ReactDriver::new(llm, ReactConfig::default());
    let ctx = ExecContext::new(registry);
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);

    let handle = tokio::spawn(async move { driver.run_stream(&ctx, "agent-1", "please echo", tx).await });

    let mut tool_call_events = Vec::new();
    while let Some(event) = rx.recv().await {
        if let agentflow::react::ReactEvent::ToolCallDetected { call } = event {
            tool_call_events.push(call);
        }
    }
    let outcome = handle.await.unwrap().unwrap();

    assert_eq!(tool_call_events.len(), 1);
    assert_eq!(tool_call_events[0].arguments, "{\"text\":\"hi\"}");
    let parsed: serde_json::Value = serde_json::from_str(&tool_call_events[0].arguments).unwrap();
    assert_eq!(parsed["text"], "hi");
    assert_eq!(outcome.final_message.content(), "done");
}
