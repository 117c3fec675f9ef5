//! Dynamic Planner: build a plan tree where each step carries a ranked list of
//! alternative approaches, then execute depth-first. A failing step first exhausts its own
//! alternatives before backtracking to the previous step and forcing it onto its next
//! alternative, up to `max_backtracks` total backtrack operations.
//!
//! Adapted from a plan/execute/backtrack node-graph staging into one `execute` call.

use std::time::Instant;

use async_trait::async_trait;

use crate::message::Message;

use super::{extract_json, PatternContext, PatternError, ReasoningPattern, ReasoningResult, ReasoningStep, StepKind};

#[derive(Clone, Debug)]
pub struct DynamicPlannerConfig {
    pub max_depth: usize,
    pub alternatives_per_step: usize,
    pub max_backtracks: u32,
}

impl Default for DynamicPlannerConfig {
    fn default() -> Self {
        Self { max_depth: 6, alternatives_per_step: 2, max_backtracks: 3 }
    }
}

struct PlanNode {
    description: String,
    approaches: Vec<String>,
    current: usize,
}

pub struct DynamicPlanner {
    config: DynamicPlannerConfig,
}

impl DynamicPlanner {
    pub fn new(config: DynamicPlannerConfig) -> Self {
        Self { config }
    }

    async fn plan_steps(&self, ctx: &PatternContext, task: &str) -> Result<(Vec<String>, u32), PatternError> {
        let messages = vec![
            Message::system("You are a planner. Decompose the task into an ordered list of concrete steps."),
            Message::user(format!(
                "Task: {task}\n\nRespond with JSON: {{\"steps\": [\"...\", ...]}}, at most {n}.",
                n = self.config.max_depth
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let steps = extract_json(&content)
            .and_then(|v| v.get("steps").and_then(|s| s.as_array().cloned()))
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect::<Vec<_>>())
            .filter(|v: &Vec<String>| !v.is_empty())
            .unwrap_or_else(|| vec![task.to_string()]);
        Ok((steps.into_iter().take(self.config.max_depth.max(1)).collect(), usage.total_tokens))
    }

    async fn generate_approaches(&self, ctx: &PatternContext, task: &str, step: &str) -> Result<(Vec<String>, u32), PatternError> {
        let messages = vec![
            Message::system("You propose several distinct alternative approaches to carry out one planned step, ranked best first."),
            Message::user(format!(
                "Task: {task}\nStep: {step}\n\nRespond with JSON: {{\"approaches\": [\"...\", ...]}}, at most {n}.",
                n = self.config.alternatives_per_step
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let approaches = extract_json(&content)
            .and_then(|v| v.get("approaches").and_then(|s| s.as_array().cloned()))
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect::<Vec<_>>())
            .filter(|v: &Vec<String>| !v.is_empty())
            .unwrap_or_else(|| vec![step.to_string()]);
        Ok((approaches.into_iter().take(self.config.alternatives_per_step.max(1)).collect(), usage.total_tokens))
    }

    async fn try_execute(&self, ctx: &PatternContext, task: &str, approach: &str, prior: &[String]) -> Result<(String, bool, u32), PatternError> {
        let history = if prior.is_empty() { String::new() } else { format!("\n\nCompleted so far:\n{}", prior.join("\n")) };
        let messages = vec![
            Message::system("You attempt one approach to a planned step and report whether it worked."),
            Message::user(format!(
                "Task: {task}\nApproach: {approach}{history}\n\nRespond with JSON: {{\"result\": \"...\", \"ok\": true|false}}."
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let (result_text, ok) = match extract_json(&content) {
            Some(value) => (
                value.get("result").and_then(|v| v.as_str()).unwrap_or(content.trim()).to_string(),
                value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
            ),
            None => (content.trim().to_string(), true),
        };
        Ok((result_text, ok, usage.total_tokens))
    }
}

#[async_trait]
impl ReasoningPattern for DynamicPlanner {
    fn name(&self) -> &str {
        "dynamic_planner"
    }

    async fn execute(&self, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError> {
        let start = Instant::now();
        let mut result = ReasoningResult::new(self.name(), task);

        let (step_descriptions, tokens) = self.plan_steps(ctx, task).await?;
        result.total_tokens += tokens;

        let mut nodes: Vec<PlanNode> = Vec::with_capacity(step_descriptions.len());
        for description in &step_descriptions {
            let (approaches, tokens) = self.generate_approaches(ctx, task, description).await?;
            result.total_tokens += tokens;
            nodes.push(PlanNode { description: description.clone(), approaches, current: 0 });
        }

        let mut completed: Vec<String> = Vec::new();
        let mut idx = 0usize;
        let mut backtracks = 0u32;

        while idx < nodes.len() {
            if ctx.is_cancelled() {
                return Err(PatternError::Cancelled);
            }
            if nodes[idx].current >= nodes[idx].approaches.len() {
                if idx == 0 || backtracks >= self.config.max_backtracks {
                    result.final_answer = format!("plan exhausted without success at step: {}", nodes[idx].description);
                    result.confidence = 0.2;
                    result.total_latency = start.elapsed();
                    return Ok(result);
                }
                backtracks += 1;
                result.steps.push(ReasoningStep::new(format!("backtrack_{backtracks}"), StepKind::Backtrack, nodes[idx].description.clone()));
                completed.pop();
                idx -= 1;
                nodes[idx].current += 1;
                continue;
            }

            let approach = nodes[idx].approaches[nodes[idx].current].clone();
            let (observation, ok, tokens) = self.try_execute(ctx, task, &approach, &completed).await?;
            result.total_tokens += tokens;

            let mut step_record = ReasoningStep::new(format!("step_{idx}_{}", nodes[idx].current), StepKind::Action, approach.clone());
            step_record.children.push(ReasoningStep::new(format!("obs_{idx}"), StepKind::Observation, observation.clone()));
            result.steps.push(step_record);

            if ok {
                completed.push(format!("{}: {observation}", nodes[idx].description));
                idx += 1;
            } else {
                nodes[idx].current += 1;
            }
        }

        let synthesis = vec![
            Message::system("You synthesize a final answer from a completed sequence of step results."),
            Message::user(format!("Task: {task}\n\nCompleted steps:\n{}\n\nRespond with the final answer as plain text.", completed.join("\n"))),
        ];
        let (final_answer, tokens) = ctx.complete(synthesis).await?;
        result.total_tokens += tokens;
        result.final_answer = final_answer.trim().to_string();
        result.confidence = 0.85;
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
    async fn happy_path_no_backtracking() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response(r#"{"steps": ["step one"]}"#))
                .with_response(response(r#"{"approaches": ["approach a", "approach b"]}"#))
                .with_response(response(r#"{"result": "done", "ok": true}"#))
                .with_response(response("final answer")),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = DynamicPlanner::new(DynamicPlannerConfig::default());
        let result = pattern.execute(&ctx, "task").await.unwrap();
        assert_eq!(result.final_answer, "final answer");
        assert!(result.steps.iter().all(|s| s.kind != StepKind::Backtrack));
    }

    #[tokio::test]
    async fn exhausts_alternatives_then_backtracks() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response(r#"{"steps": ["step one", "step two"]}"#))
                .with_response(response(r#"{"approaches": ["a1"]}"#))
                .with_response(response(r#"{"approaches": ["b1", "b2"]}"#))
                .with_response(response(r#"{"result": "one done", "ok": true}"#))
                .with_response(response(r#"{"result": "b1 failed", "ok": false}"#))
                .with_response(response(r#"{"result": "b2 failed", "ok": false}"#)),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = DynamicPlanner::new(DynamicPlannerConfig { max_depth: 6, alternatives_per_step: 2, max_backtracks: 0 });
        let result = pattern.execute(&ctx, "task").await.unwrap();
        assert!(result.final_answer.contains("exhausted"));
        assert!(result.confidence < 0.5);
    }
}
