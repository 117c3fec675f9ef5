//! A hand-rolled deterministic fake [`LlmClient`] for tests: scripted responses/streams keyed
//! by call order, so ReAct/pattern tests never depend on a real provider.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChatChunk, ChatRequest, ChatResponse, LlmClient};
use crate::error::AgentError;

/// Replays a fixed script of completions and streamed-chunk batches in call order. Panics via
/// an [`AgentError::LlmTransport`] if asked for more calls than were scripted, which surfaces
/// as a clear test failure rather than a hang.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<ChatResponse>>,
    streams: Mutex<VecDeque<Vec<ChatChunk>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: ChatResponse) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_stream(self, chunks: Vec<ChatChunk>) -> Self {
        self.streams.lock().unwrap().push_back(chunks);
        self
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn completion(&self, _request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::LlmTransport("scripted llm: no more completions".to_string()))
    }

    async fn stream(&self, _request: &ChatRequest) -> Result<mpsc::Receiver<ChatChunk>, AgentError> {
        let chunks = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::LlmTransport("scripted llm: no more streams".to_string()))?;
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[tokio::test]
    async fn replays_scripted_completions_in_order() {
        let llm = ScriptedLlm::new()
            .with_response(ChatResponse { choices: vec![], usage: None })
            .with_response(ChatResponse {
                choices: vec![super::super::ChatChoice {
                    message: Message::assistant("done"),
                    finish_reason: super::super::FinishReason::Stop,
                }],
                usage: None,
            });
        let req = ChatRequest::new("test-model", vec![]);
        let first = llm.completion(&req).await.unwrap();
        assert!(first.choices.is_empty());
        let second = llm.completion(&req).await.unwrap();
        assert_eq!(second.choices[0].message.content(), "done");
    }

    #[tokio::test]
    async fn exhausted_script_errors() {
        let llm = ScriptedLlm::new();
        let req = ChatRequest::new("test-model", vec![]);
        assert!(llm.completion(&req).await.is_err());
    }
}
