//! Reasoning patterns: named strategies that coordinate the LLM and the tool executor
//! to realise a higher-level problem-solving approach. Each pattern implements
//! [`ReasoningPattern`]; [`PatternRegistry`] maps names to instances.
//!
//! Tolerant LLM-output parsing (line-based, then JSON envelope, then raw-content fallback) and
//! a thought/candidate/score tree shape, collapsed into one `execute` call per pattern since
//! this crate has no graph engine.

pub mod dynamic_planner;
pub mod iterative_deepening;
pub mod plan_and_execute;
pub mod reflexion;
pub mod rewoo;
pub mod tree_of_thought;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::llm::LlmUsage;

pub use dynamic_planner::DynamicPlanner;
pub use iterative_deepening::IterativeDeepening;
pub use plan_and_execute::PlanAndExecute;
pub use reflexion::Reflexion;
pub use rewoo::Rewoo;
pub use tree_of_thought::TreeOfThought;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern not found: {0}")]
    NotFound(String),
    #[error("llm transport error: {0}")]
    Llm(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// One kind of step recorded in a [`ReasoningResult`]'s trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Thought,
    Action,
    Observation,
    Evaluation,
    Reflection,
    Backtrack,
}

/// One node in a pattern's reasoning trace; `children` lets beam/tree-shaped patterns nest
/// steps instead of flattening them.
#[derive(Clone, Debug)]
pub struct ReasoningStep {
    pub step_id: String,
    pub kind: StepKind,
    pub content: String,
    pub score: Option<f64>,
    pub children: Vec<ReasoningStep>,
    pub duration: Duration,
    pub tokens_used: u32,
}

impl ReasoningStep {
    pub fn new(step_id: impl Into<String>, kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            kind,
            content: content.into(),
            score: None,
            children: Vec::new(),
            duration: Duration::ZERO,
            tokens_used: 0,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens_used = tokens;
        self
    }
}

/// The outcome of running a pattern to completion.
#[derive(Clone, Debug)]
pub struct ReasoningResult {
    pub pattern_name: String,
    pub task: String,
    pub final_answer: String,
    pub confidence: f64,
    pub steps: Vec<ReasoningStep>,
    pub total_tokens: u32,
    pub total_latency: Duration,
    pub metadata: HashMap<String, String>,
}

impl ReasoningResult {
    pub fn new(pattern_name: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            pattern_name: pattern_name.into(),
            task: task.into(),
            final_answer: String::new(),
            confidence: 0.0,
            steps: Vec::new(),
            total_tokens: 0,
            total_latency: Duration::ZERO,
            metadata: HashMap::new(),
        }
    }
}

/// Common contract every reasoning pattern implements.
#[async_trait]
pub trait ReasoningPattern: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError>;
}

/// Ambient handles a pattern needs: the LLM, optionally the tool executor context, and a
/// cancellation signal honoured between LLM calls and during timed back-offs (a pattern must
/// honour the caller's cancellation/timeout).
#[derive(Clone)]
pub struct PatternContext {
    pub llm: Arc<dyn crate::llm::LlmClient>,
    pub exec: Option<crate::executor::ExecContext>,
    pub model: String,
}

impl PatternContext {
    pub fn new(llm: Arc<dyn crate::llm::LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, exec: None, model: model.into() }
    }

    pub fn with_exec(mut self, exec: crate::executor::ExecContext) -> Self {
        self.exec = Some(exec);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.exec.as_ref().map(|e| e.cancel.is_cancelled()).unwrap_or(false)
    }

    /// One-shot LLM completion with no tools attached, the shape every pattern uses to
    /// generate thoughts/plans/scores.
    pub async fn complete(&self, messages: Vec<crate::message::Message>) -> Result<(String, LlmUsage), PatternError> {
        let request = crate::llm::ChatRequest::new(self.model.clone(), messages);
        let response = self.llm.completion(&request).await.map_err(|e| PatternError::Llm(e.to_string()))?;
        let usage = response.usage.unwrap_or_default();
        let content = response.first_choice().map(|c| c.message.content().to_string()).unwrap_or_default();
        Ok((content, usage))
    }
}

/// Best-effort extraction of a JSON value embedded in LLM prose, e.g. inside a ```json fenced
/// block or as the first top-level `{...}`/`[...]` span. Every pattern's parser falls back to
/// treating the raw content as a single thought/step when this fails.
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(v);
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(after[..end].trim()) {
                return Some(v);
            }
        }
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let Some(start) = trimmed.find(open) {
            if let Some(end) = trimmed.rfind(close) {
                if end > start {
                    if let Ok(v) = serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]) {
                        return Some(v);
                    }
                }
            }
        }
    }
    None
}

/// Maps pattern names to instances. Write-rare, read-mostly.
#[derive(Default)]
pub struct PatternRegistry {
    patterns: RwLock<HashMap<String, Arc<dyn ReasoningPattern>>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, pattern: Arc<dyn ReasoningPattern>) {
        self.patterns.write().await.insert(pattern.name().to_string(), pattern);
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn ReasoningPattern>, PatternError> {
        self.patterns.read().await.get(name).cloned().ok_or_else(|| PatternError::NotFound(name.to_string()))
    }

    pub async fn names(&self) -> Vec<String> {
        self.patterns.read().await.keys().cloned().collect()
    }

    pub async fn execute(&self, name: &str, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError> {
        self.get(name).await?.execute(ctx, task).await
    }
}
