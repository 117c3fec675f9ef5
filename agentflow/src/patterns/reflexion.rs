//! Reflexion: attempt the task, self-score the attempt, reflect on what went wrong, and
//! retry with the reflection folded into context, up to `max_trials`. Returns the
//! best-scoring trial, not necessarily the last.
//!
//! Adapted from a tree-backtrack scoring loop into a linear retry-with-memory loop.

use std::time::Instant;

use async_trait::async_trait;

use crate::message::Message;

use super::{extract_json, PatternContext, PatternError, ReasoningPattern, ReasoningResult, ReasoningStep, StepKind};

#[derive(Clone, Debug)]
pub struct ReflexionConfig {
    pub max_trials: u32,
    pub satisfactory_score: f64,
}

impl Default for ReflexionConfig {
    fn default() -> Self {
        Self { max_trials: 3, satisfactory_score: 0.85 }
    }
}

struct Trial {
    answer: String,
    score: f64,
    reflection: String,
}

pub struct Reflexion {
    config: ReflexionConfig,
}

impl Reflexion {
    pub fn new(config: ReflexionConfig) -> Self {
        Self { config }
    }

    async fn attempt(&self, ctx: &PatternContext, task: &str, reflections: &[String]) -> Result<(String, u32), PatternError> {
        let memory = if reflections.is_empty() {
            String::new()
        } else {
            format!("\n\nLessons from previous attempts:\n{}", reflections.join("\n"))
        };
        let messages = vec![
            Message::system("You attempt to solve the task, taking prior lessons learned into account."),
            Message::user(format!("Task: {task}{memory}\n\nRespond with your best attempt as plain text.")),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        Ok((content.trim().to_string(), usage.total_tokens))
    }

    async fn self_score(&self, ctx: &PatternContext, task: &str, answer: &str) -> Result<(f64, u32), PatternError> {
        let messages = vec![
            Message::system("You critically score an attempted answer for correctness and completeness."),
            Message::user(format!("Task: {task}\nAttempt: {answer}\n\nRespond with JSON: {{\"score\": <0..1>}}.")),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        let score = extract_json(&content).and_then(|v| v.get("score").and_then(|s| s.as_f64())).unwrap_or(0.5);
        Ok((score.clamp(0.0, 1.0), usage.total_tokens))
    }

    async fn reflect(&self, ctx: &PatternContext, task: &str, answer: &str, score: f64) -> Result<(String, u32), PatternError> {
        let messages = vec![
            Message::system("You reflect on why an attempt scored as it did and what to do differently next time."),
            Message::user(format!(
                "Task: {task}\nAttempt: {answer}\nScore: {score:.2}\n\nRespond with one or two sentences of concrete lessons for next attempt."
            )),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        Ok((content.trim().to_string(), usage.total_tokens))
    }
}

#[async_trait]
impl ReasoningPattern for Reflexion {
    fn name(&self) -> &str {
        "reflexion"
    }

    async fn execute(&self, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError> {
        let start = Instant::now();
        let mut result = ReasoningResult::new(self.name(), task);
        let mut reflections: Vec<String> = Vec::new();
        let mut trials: Vec<Trial> = Vec::new();

        for trial_idx in 0..self.config.max_trials.max(1) {
            if ctx.is_cancelled() {
                return Err(PatternError::Cancelled);
            }
            let (answer, tokens) = self.attempt(ctx, task, &reflections).await?;
            result.total_tokens += tokens;
            let (score, tokens) = self.self_score(ctx, task, &answer).await?;
            result.total_tokens += tokens;

            let mut trial_step = ReasoningStep::new(format!("trial_{trial_idx}"), StepKind::Action, answer.clone()).with_score(score);

            if score >= self.config.satisfactory_score {
                trial_step.children.push(ReasoningStep::new(format!("score_{trial_idx}"), StepKind::Evaluation, format!("{score:.2}")));
                result.steps.push(trial_step);
                trials.push(Trial { answer, score, reflection: String::new() });
                break;
            }

            let is_last = trial_idx + 1 >= self.config.max_trials;
            let reflection = if is_last {
                String::new()
            } else {
                let (reflection, tokens) = self.reflect(ctx, task, &answer, score).await?;
                result.total_tokens += tokens;
                reflection
            };
            if !reflection.is_empty() {
                trial_step.children.push(ReasoningStep::new(format!("reflect_{trial_idx}"), StepKind::Reflection, reflection.clone()));
                reflections.push(reflection);
            }
            result.steps.push(trial_step);
            trials.push(Trial { answer, score, reflection: String::new() });
        }

        let best = trials.into_iter().max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        match best {
            Some(trial) => {
                result.final_answer = trial.answer;
                result.confidence = trial.score;
                let _ = trial.reflection;
            }
            None => {
                result.final_answer = String::new();
                result.confidence = 0.0;
            }
        }
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
    async fn stops_early_once_satisfactory() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response("first attempt"))
                .with_response(response(r#"{"score": 0.95}"#)),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = Reflexion::new(ReflexionConfig::default());
        let result = pattern.execute(&ctx, "task").await.unwrap();
        assert_eq!(result.final_answer, "first attempt");
        assert!(result.confidence >= 0.85);
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn retries_and_keeps_best_scoring_trial() {
        let llm = Arc::new(
            ScriptedLlm::new()
                .with_response(response("weak attempt"))
                .with_response(response(r#"{"score": 0.3}"#))
                .with_response(response("lesson: be more specific"))
                .with_response(response("better attempt"))
                .with_response(response(r#"{"score": 0.6}"#)),
        );
        let ctx = PatternContext::new(llm, "test-model");
        let pattern = Reflexion::new(ReflexionConfig { max_trials: 2, satisfactory_score: 0.85 });
        let result = pattern.execute(&ctx, "task").await.unwrap();
        assert_eq!(result.final_answer, "better attempt");
        assert!((result.confidence - 0.6).abs() < 1e-9);
        assert_eq!(result.steps.len(), 2);
    }
}
