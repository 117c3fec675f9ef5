//! Plan-and-Execute: produce an ordered plan up front, execute it step by step, and
//! adaptively replan from the point of failure when a step doesn't pan out.
//!
//! Follows a plan-then-execute staging with tolerant output parsing, reused here via
//! [`super::extract_json`].

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::message::Message;

use super::{extract_json, PatternContext, PatternError, ReasoningPattern, ReasoningResult, ReasoningStep, StepKind};

#[derive(Clone, Debug)]
pub struct PlanAndExecuteConfig {
    pub max_steps: usize,
    pub max_replans: u32,
}

impl Default for PlanAndExecuteConfig {
    fn default() -> Self {
        Self { max_steps: 8, max_replans: 2 }
    }
}

#[derive(Deserialize)]
struct PlanEnvelope {
    steps: Vec<String>,
}

pub struct PlanAndExecute {
    config: PlanAndExecuteConfig,
}

impl PlanAndExecute {
    pub fn new(config: PlanAndExecuteConfig) -> Self {
        Self { config }
    }

    fn parse_plan(&self, content: &str) -> Vec<String> {
        if let Some(value) = extract_json(content) {
            if let Ok(envelope) = serde_json::from_value::<PlanEnvelope>(value.clone()) {
                if !envelope.steps.is_empty() {
                    return envelope.steps;
                }
            }
            if let Some(arr) = value.as_array() {
                let steps: Vec<String> = arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect();
                if !steps.is_empty() {
                    return steps;
                }
            }
        }
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|l| l.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-' || c == ' ').to_string())
            .filter(|l| !l.is_empty())
            .collect()
    }

    async fn plan(&self, ctx: &PatternContext, task: &str, failure_note: Option<&str>) -> Result<(Vec<String>, u32), PatternError> {
        let note = failure_note.map(|f| format!("\n\nThe previous plan failed at: {f}. Produce a revised plan avoiding that failure.")).unwrap_or_default();
        let messages = vec![
            Message::system("You are a planner. Decompose the task into an ordered list of concrete steps."),
            Message::user(format!(
                "Task: {task}{note}\n\nRespond with JSON: {{\"steps\": [\"step one\", \"step two\", ...]}}, at most {max}.",
                max = self.config.max_steps
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        Ok((self.parse_plan(&content).into_iter().take(self.config.max_steps).collect(), usage.total_tokens))
    }

    async fn execute_step(&self, ctx: &PatternContext, task: &str, step: &str, prior: &[String]) -> Result<(String, bool, u32), PatternError> {
        let history = if prior.is_empty() { String::new() } else { format!("\n\nCompleted so far:\n{}", prior.join("\n")) };
        let messages = vec![
            Message::system("You execute one planned step and report the outcome."),
            Message::user(format!(
                "Task: {task}\nCurrent step: {step}{history}\n\nRespond with JSON: {{\"result\": \"...\", \"ok\": true|false}}."
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let (result_text, ok) = match extract_json(&content) {
            Some(value) => {
                let result = value.get("result").and_then(|v| v.as_str()).unwrap_or(content.trim()).to_string();
                let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
                (result, ok)
            }
            None => (content.trim().to_string(), true),
        };
        Ok((result_text, ok, usage.total_tokens))
    }
}

#[async_trait]
impl ReasoningPattern for PlanAndExecute {
    fn name(&self) -> &str {
        "plan_and_execute"
    }

    async fn execute(&self, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError> {
        let start = Instant::now();
        let mut result = ReasoningResult::new(self.name(), task);
        let mut failure_note: Option<String> = None;
        let mut replans = 0u32;
        let mut completed: Vec<String> = Vec::new();

        loop {
            let (plan_steps, tokens) = self.plan(ctx, task, failure_note.as_deref()).await?;
            result.total_tokens += tokens;
            let plan_step = ReasoningStep::new(format!("plan_{replans}"), StepKind::Thought, plan_steps.join(" -> "));
            result.steps.push(plan_step);

            if plan_steps.is_empty() {
                result.final_answer = "no plan could be produced".to_string();
                result.confidence = 0.0;
                result.total_latency = start.elapsed();
                return Ok(result);
            }

            let mut failed_at: Option<String> = None;
            for (idx, step) in plan_steps.iter().enumerate() {
                if ctx.is_cancelled() {
                    return Err(PatternError::Cancelled);
                }
                let (observation, ok, tokens) = self.execute_step(ctx, task, step, &completed).await?;
                result.total_tokens += tokens;
                let mut step_record = ReasoningStep::new(format!("step_{replans}_{idx}"), StepKind::Action, step.clone());
                step_record.children.push(ReasoningStep::new(format!("obs_{replans}_{idx}"), StepKind::Observation, observation.clone()));
                result.steps.push(step_record);

                if !ok {
                    failed_at = Some(format!("{step} -> {observation}"));
                    break;
                }
                completed.push(format!("{step}: {observation}"));
            }

            match failed_at {
                Some(failure) if replans < self.config.max_replans => {
                    replans += 1;
                    failure_note = Some(failure);
                    continue;
                }
                Some(failure) => {
                    result.final_answer = format!("plan could not complete: {failure}");
                    result.confidence = 0.3;
                    result.total_latency = start.elapsed();
                    return Ok(result);
                }
                None => break,
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
    async fn happy_path_plan_execute_synthesize() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response(r#"{"steps": ["gather inputs", "compute result"]}"#))
                .with_response(response(r#"{"result": "inputs gathered", "ok": true}"#))
                .with_response(response(r#"{"result": "result computed", "ok": true}"#))
                .with_response(response("final answer: done")),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = PlanAndExecute::new(PlanAndExecuteConfig::default());
        let result = pattern.execute(&ctx, "do the thing").await.unwrap();
        assert_eq!(result.final_answer, "final answer: done");
        assert!(result.confidence > 0.5);
    }

    #[tokio::test]
    async fn replans_after_step_failure_then_succeeds() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response(r#"{"steps": ["risky step"]}"#))
                .with_response(response(r#"{"result": "it broke", "ok": false}"#))
                .with_response(response(r#"{"steps": ["safer step"]}"#))
                .with_response(response(r#"{"result": "worked", "ok": true}"#))
                .with_response(response("final answer: recovered")),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = PlanAndExecute::new(PlanAndExecuteConfig { max_steps: 8, max_replans: 1 });
        let result = pattern.execute(&ctx, "do the thing").await.unwrap();
        assert_eq!(result.final_answer, "final answer: recovered");
    }

    #[tokio::test]
    async fn gives_up_after_max_replans_exhausted() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response(r#"{"steps": ["risky step"]}"#))
                .with_response(response(r#"{"result": "it broke", "ok": false}"#)),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = PlanAndExecute::new(PlanAndExecuteConfig { max_steps: 8, max_replans: 0 });
        let result = pattern.execute(&ctx, "do the thing").await.unwrap();
        assert!(result.final_answer.contains("could not complete"));
        assert!(result.confidence < 0.5);
    }
}
