//! Iterative Deepening: explore the task breadth-first with an initial batch of
//! queries, then recursively deepen where confidence is still low, tracking a running
//! confidence score until it clears a threshold or `max_depth` is reached.
//!
//! Confidence combines average finding relevance with a saturating count bonus:
//! `0.6 * avg_relevance + 0.4 * (1 - 1/(1 + n_findings))`, clipped to `[0, 1]`.
//!
//! Follows a breadth-then-recurse staging with a tolerant parsing idiom for LLM output.

use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::message::Message;

use super::{extract_json, PatternContext, PatternError, ReasoningPattern, ReasoningResult, ReasoningStep, StepKind};

#[derive(Clone, Debug)]
pub struct IterativeDeepeningConfig {
    pub initial_breadth: usize,
    pub max_depth: u32,
    pub early_exit_confidence: f64,
}

impl Default for IterativeDeepeningConfig {
    fn default() -> Self {
        Self { initial_breadth: 3, max_depth: 3, early_exit_confidence: 0.9 }
    }
}

#[derive(Clone, Debug)]
struct Finding {
    query: String,
    content: String,
    relevance: f64,
}

fn confidence(findings: &[Finding]) -> f64 {
    if findings.is_empty() {
        return 0.0;
    }
    let avg_relevance = findings.iter().map(|f| f.relevance).sum::<f64>() / findings.len() as f64;
    let count_bonus = 1.0 - 1.0 / (1.0 + findings.len() as f64);
    (0.6 * avg_relevance + 0.4 * count_bonus).clamp(0.0, 1.0)
}

pub struct IterativeDeepening {
    config: IterativeDeepeningConfig,
}

impl IterativeDeepening {
    pub fn new(config: IterativeDeepeningConfig) -> Self {
        Self { config }
    }

    async fn initial_queries(&self, ctx: &PatternContext, task: &str) -> Result<(Vec<String>, u32), PatternError> {
        let messages = vec![
            Message::system("You break a research task into an initial set of distinct investigative queries."),
            Message::user(format!(
                "Task: {task}\n\nRespond with JSON: {{\"queries\": [\"...\", ...]}}, at most {n}.",
                n = self.config.initial_breadth
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let queries = extract_json(&content)
            .and_then(|v| v.get("queries").and_then(|q| q.as_array().cloned()))
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect::<Vec<_>>())
            .filter(|v: &Vec<String>| !v.is_empty())
            .unwrap_or_else(|| vec![task.to_string()]);
        Ok((queries.into_iter().take(self.config.initial_breadth.max(1)).collect(), usage.total_tokens))
    }

    async fn investigate(&self, ctx: &PatternContext, task: &str, query: &str) -> Result<(Finding, u32), PatternError> {
        let messages = vec![
            Message::system("You investigate one query relevant to a larger task and report a finding with its relevance."),
            Message::user(format!(
                "Task: {task}\nQuery: {query}\n\nRespond with JSON: {{\"finding\": \"...\", \"relevance\": <0..1>}}."
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let (finding, relevance) = match extract_json(&content) {
            Some(value) => (
                value.get("finding").and_then(|v| v.as_str()).unwrap_or(content.trim()).to_string(),
                value.get("relevance").and_then(|v| v.as_f64()).unwrap_or(0.5).clamp(0.0, 1.0),
            ),
            None => (content.trim().to_string(), 0.5),
        };
        Ok((Finding { query: query.to_string(), content: finding, relevance }, usage.total_tokens))
    }

    async fn refine_queries(&self, ctx: &PatternContext, task: &str, findings: &[Finding]) -> Result<(Vec<String>, u32), PatternError> {
        let summary = findings.iter().map(|f| format!("- {} (relevance {:.2}): {}", f.query, f.relevance, f.content)).collect::<Vec<_>>().join("\n");
        let messages = vec![
            Message::system("You identify remaining gaps and propose follow-up queries to deepen a research task."),
            Message::user(format!(
                "Task: {task}\n\nFindings so far:\n{summary}\n\nRespond with JSON: {{\"queries\": [\"...\"]}} for follow-up queries, at most {n}.",
                n = self.config.initial_breadth
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let queries = extract_json(&content)
            .and_then(|v| v.get("queries").and_then(|q| q.as_array().cloned()))
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default();
        Ok((queries, usage.total_tokens))
    }

    fn explore<'a>(
        &'a self,
        ctx: &'a PatternContext,
        task: &'a str,
        depth: u32,
        queries: Vec<String>,
        mut findings: Vec<Finding>,
        steps: &'a mut Vec<ReasoningStep>,
        total_tokens: &'a mut u32,
    ) -> BoxFuture<'a, Result<Vec<Finding>, PatternError>> {
        Box::pin(async move {
            if ctx.is_cancelled() {
                return Err(PatternError::Cancelled);
            }
            let mut depth_step = ReasoningStep::new(format!("depth_{depth}"), StepKind::Observation, format!("investigating {} queries", queries.len()));
            for query in &queries {
                let (finding, tokens) = self.investigate(ctx, task, query).await?;
                *total_tokens += tokens;
                depth_step.children.push(
                    ReasoningStep::new(format!("finding_{depth}_{}", findings.len()), StepKind::Observation, finding.content.clone())
                        .with_score(finding.relevance),
                );
                findings.push(finding);
            }
            steps.push(depth_step);

            let current_confidence = confidence(&findings);
            if current_confidence >= self.config.early_exit_confidence || depth + 1 >= self.config.max_depth {
                return Ok(findings);
            }

            let (next_queries, tokens) = self.refine_queries(ctx, task, &findings).await?;
            *total_tokens += tokens;
            if next_queries.is_empty() {
                return Ok(findings);
            }
            self.explore(ctx, task, depth + 1, next_queries, findings, steps, total_tokens).await
        })
    }
}

#[async_trait]
impl ReasoningPattern for IterativeDeepening {
    fn name(&self) -> &str {
        "iterative_deepening"
    }

    async fn execute(&self, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError> {
        let start = Instant::now();
        let mut result = ReasoningResult::new(self.name(), task);

        let (queries, tokens) = self.initial_queries(ctx, task).await?;
        result.total_tokens += tokens;

        let mut steps = Vec::new();
        let mut tokens_acc = 0u32;
        let findings = self.explore(ctx, task, 0, queries, Vec::new(), &mut steps, &mut tokens_acc).await?;
        result.total_tokens += tokens_acc;
        result.steps = steps;

        let final_confidence = confidence(&findings);
        let summary = findings.iter().map(|f| format!("- {}", f.content)).collect::<Vec<_>>().join("\n");
        let synthesis = vec![
            Message::system("You synthesize a final answer from accumulated research findings."),
            Message::user(format!("Task: {task}\n\nFindings:\n{summary}\n\nRespond with the final answer as plain text.")),
        ];
        let (final_answer, tokens) = ctx.complete(synthesis).await?;
        result.total_tokens += tokens;
        result.final_answer = final_answer.trim().to_string();
        result.confidence = final_confidence;
        result.total_latency = start.elapsed();
        Ok(result)
    }
}
