//! Tree-of-Thought: beam search over LLM-generated "thoughts", scored either by
//! self-evaluation or majority vote, pruned to a beam at each depth. Short-circuits on any
//! thought scoring ≥ 0.9.
//!
//! Candidate generation and parsing falls back in stages (line-based `CANDIDATE i: ...`, then
//! a JSON envelope, then raw content), and the scoring/pruning loop collapses into one
//! `execute` call.

use std::time::Instant;

use async_trait::async_trait;

use crate::message::Message;

use super::{extract_json, PatternContext, PatternError, ReasoningPattern, ReasoningResult, ReasoningStep, StepKind};

/// Strategic knobs for [`TreeOfThought`].
#[derive(Clone, Debug)]
pub struct TotConfig {
    pub max_depth: u32,
    pub branching_factor: usize,
    pub beam_width: usize,
    pub prune_threshold: f64,
    pub short_circuit_score: f64,
    pub use_majority_vote: bool,
}

impl Default for TotConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            branching_factor: 3,
            beam_width: 2,
            prune_threshold: 0.2,
            short_circuit_score: 0.9,
            use_majority_vote: false,
        }
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    path: Vec<String>,
    score: f64,
}

impl Candidate {
    fn thought(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or("")
    }
}

pub struct TreeOfThought {
    config: TotConfig,
}

impl TreeOfThought {
    pub fn new(config: TotConfig) -> Self {
        Self { config }
    }

    fn build_expand_prompt(&self, task: &str, candidate: &Candidate) -> Vec<Message> {
        let history = if candidate.path.is_empty() {
            String::new()
        } else {
            format!("\n\nThoughts so far:\n{}", candidate.path.join("\n- "))
        };
        let instruction = format!(
            "Task: {task}{history}\n\nGenerate exactly {n} distinct next thoughts that continue \
             toward solving the task. Respond with a JSON object: {{\"thoughts\": [\"...\", ...]}}.",
            n = self.config.branching_factor
        );
        vec![Message::system(
            "You are a step-by-step problem solver exploring multiple reasoning branches.",
        ), Message::user(instruction)]
    }

    /// Parses `{"thoughts": [...]}`, falling back to one line per non-empty line of raw
    /// content when the model didn't return JSON (never crash on non-JSON output).
    fn parse_thoughts(&self, content: &str) -> Vec<String> {
        if let Some(value) = extract_json(content) {
            if let Some(arr) = value.get("thoughts").and_then(|v| v.as_array()) {
                let thoughts: Vec<String> = arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect();
                if !thoughts.is_empty() {
                    return thoughts;
                }
            }
            if let Some(arr) = value.as_array() {
                let thoughts: Vec<String> = arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect();
                if !thoughts.is_empty() {
                    return thoughts;
                }
            }
        }
        let lines: Vec<String> = content.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
        if lines.is_empty() {
            vec![content.trim().to_string()]
        } else {
            lines
        }
    }

    /// Scores one thought in `[0,1]` via LLM self-evaluation (or majority vote over repeated
    /// samples when configured). Unparsable output maps to the neutral mid-score.
    async fn score_thought(&self, ctx: &PatternContext, task: &str, thought: &str) -> (f64, u32) {
        if self.config.use_majority_vote {
            return self.score_by_majority_vote(ctx, task, thought).await;
        }
        let prompt = vec![
            Message::system("You score candidate reasoning steps for how promising they are."),
            Message::user(format!(
                "Task: {task}\nCandidate thought: {thought}\n\nRespond with JSON: {{\"score\": <0..1>}}."
            )),
        ];
        match ctx.complete(prompt).await {
            Ok((content, usage)) => {
                let score = extract_json(&content).and_then(|v| v.get("score").and_then(|s| s.as_f64())).unwrap_or(0.5);
                (score.clamp(0.0, 1.0), usage.total_tokens)
            }
            Err(_) => (0.5, 0),
        }
    }

    async fn score_by_majority_vote(&self, ctx: &PatternContext, task: &str, thought: &str) -> (f64, u32) {
        const VOTERS: usize = 3;
        let mut total = 0.0;
        let mut tokens = 0u32;
        let mut votes = 0usize;
        for _ in 0..VOTERS {
            let prompt = vec![
                Message::system("You judge whether a reasoning step helps solve the task. Answer yes or no."),
                Message::user(format!("Task: {task}\nCandidate thought: {thought}\n\nRespond with JSON: {{\"helps\": true|false}}.")),
            ];
            if let Ok((content, usage)) = ctx.complete(prompt).await {
                tokens += usage.total_tokens;
                let helps = extract_json(&content).and_then(|v| v.get("helps").and_then(|b| b.as_bool())).unwrap_or(false);
                total += if helps { 1.0 } else { 0.0 };
                votes += 1;
            }
        }
        (if votes > 0 { total / votes as f64 } else { 0.5 }, tokens)
    }
}

#[async_trait]
impl ReasoningPattern for TreeOfThought {
    fn name(&self) -> &str {
        "tree_of_thought"
    }

    async fn execute(&self, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError> {
        let start = Instant::now();
        let mut result = ReasoningResult::new(self.name(), task);
        let mut frontier = vec![Candidate { path: Vec::new(), score: 1.0 }];
        let mut best: Option<Candidate> = None;

        for depth in 0..self.config.max_depth {
            if ctx.is_cancelled() {
                return Err(PatternError::Cancelled);
            }
            let mut depth_step = ReasoningStep::new(format!("depth_{depth}"), StepKind::Thought, format!("expanding {} nodes", frontier.len()));
            let mut expanded = Vec::new();

            for parent in &frontier {
                let (content, usage) = ctx.complete(self.build_expand_prompt(task, parent)).await?;
                result.total_tokens += usage.total_tokens;
                let thoughts = self.parse_thoughts(&content);
                for thought in thoughts.into_iter().take(self.config.branching_factor) {
                    let (score, tokens) = self.score_thought(ctx, task, &thought).await;
                    result.total_tokens += tokens;
                    let mut path = parent.path.clone();
                    path.push(thought.clone());
                    let step = ReasoningStep::new(format!("d{depth}_{}", expanded.len()), StepKind::Evaluation, thought).with_score(score);
                    depth_step.children.push(step);
                    let candidate = Candidate { path, score };
                    if candidate.score >= self.config.short_circuit_score {
                        result.final_answer = candidate.thought().to_string();
                        result.confidence = candidate.score;
                        result.steps.push(depth_step);
                        result.total_latency = start.elapsed();
                        return Ok(result);
                    }
                    expanded.push(candidate);
                }
            }
            result.steps.push(depth_step);

            expanded.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            let above_threshold: Vec<Candidate> = expanded.iter().filter(|c| c.score >= self.config.prune_threshold).cloned().collect();
            let surviving = if above_threshold.is_empty() { expanded.clone() } else { above_threshold };
            frontier = surviving.into_iter().take(self.config.beam_width).collect();

            if let Some(top) = frontier.first() {
                if best.as_ref().map(|b| top.score > b.score).unwrap_or(true) {
                    best = Some(top.clone());
                }
            }
            if frontier.is_empty() {
                break;
            }
        }

        let winner = best.unwrap_or(Candidate { path: vec![task.to_string()], score: 0.0 });
        result.final_answer = winner.thought().to_string();
        result.confidence = winner.score;
        result.total_latency = start.elapsed();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_support::ScriptedLlm;
    use crate::llm::{ChatChoice, ChatResponse, FinishReason};
    use std::sync::Arc;

    fn response(content: &str) -> ChatResponse {
        ChatResponse {
            choices: vec![ChatChoice { message: Message::assistant(content), finish_reason: FinishReason::Stop }],
            usage: None,
        }
    }

    #[tokio::test]
    async fn short_circuits_on_high_score() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response(r#"{"thoughts": ["great idea", "bad idea"]}"#))
                .with_response(response(r#"{"score": 0.95}"#)),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = TreeOfThought::new(TotConfig { max_depth: 5, branching_factor: 2, ..Default::default() });
        let result = pattern.execute(&ctx, "solve it").await.unwrap();
        assert_eq!(result.final_answer, "great idea");
        assert!(result.confidence >= 0.9);
    }

    #[tokio::test]
    async fn falls_back_to_best_after_max_depth() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response(r#"{"thoughts": ["ok idea"]}"#))
                .with_response(response(r#"{"score": 0.4}"#)),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = TreeOfThought::new(TotConfig { max_depth: 1, branching_factor: 1, beam_width: 1, ..Default::default() });
        let result = pattern.execute(&ctx, "solve it").await.unwrap();
        assert_eq!(result.final_answer, "ok idea");
        assert!((result.confidence - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn non_json_expand_output_falls_back_to_lines() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response("just think about it directly"))
                .with_response(response("not json either")),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = TreeOfThought::new(TotConfig { max_depth: 1, branching_factor: 1, beam_width: 1, ..Default::default() });
        let result = pattern.execute(&ctx, "task").await.unwrap();
        assert_eq!(result.final_answer, "just think about it directly");
        assert!((result.confidence - 0.5).abs() < 1e-9);
    }
}
