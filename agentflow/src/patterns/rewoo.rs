//! ReWOO — Reasoning WithOut Observation: a planner emits a plan whose steps reference
//! symbolic evidence variables (`#E1`, `#E2`, ...), a worker phase resolves each step in
//! dependency order by textually substituting prior evidence, and a solver phase synthesizes
//! the final answer from the plan plus gathered evidence.
//!
//! Follows a planner/worker staging with tolerant JSON-envelope parsing.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::message::Message;

use super::{extract_json, PatternContext, PatternError, ReasoningPattern, ReasoningResult, ReasoningStep, StepKind};

#[derive(Clone, Debug)]
pub struct RewooConfig {
    pub max_steps: usize,
}

impl Default for RewooConfig {
    fn default() -> Self {
        Self { max_steps: 6 }
    }
}

#[derive(Deserialize, Clone, Debug)]
struct PlanStep {
    #[serde(rename = "var")]
    var_name: String,
    description: String,
    query: String,
}

#[derive(Deserialize)]
struct PlanEnvelope {
    steps: Vec<PlanStep>,
}

pub struct Rewoo {
    config: RewooConfig,
}

impl Rewoo {
    pub fn new(config: RewooConfig) -> Self {
        Self { config }
    }

    /// Parses the planner's `{"steps": [{"var": "#E1", "description": "...", "query": "..."}]}`.
    /// Falls back to a single-step plan over the raw content when the model didn't comply,
    /// rather than failing the whole pattern.
    fn parse_plan(&self, task: &str, content: &str) -> Vec<PlanStep> {
        if let Some(value) = extract_json(content) {
            if let Ok(envelope) = serde_json::from_value::<PlanEnvelope>(value) {
                if !envelope.steps.is_empty() {
                    return envelope.steps;
                }
            }
        }
        vec![PlanStep { var_name: "#E1".to_string(), description: "answer directly".to_string(), query: task.to_string() }]
    }

    /// Textual substitution of every known `#E<n>` occurrence in `query` with its resolved
    /// evidence value. Unknown variables pass through unchanged.
    fn substitute(&self, query: &str, evidence: &[(String, String)]) -> String {
        let mut resolved = query.to_string();
        for (var, value) in evidence {
            resolved = resolved.replace(var.as_str(), value.as_str());
        }
        resolved
    }

    async fn run_worker(&self, ctx: &PatternContext, step: &PlanStep, resolved_query: &str) -> Result<(String, u32), PatternError> {
        let messages = vec![
            Message::system("You are a worker that gathers one piece of evidence for a larger plan."),
            Message::user(format!("Step: {}\nQuery: {resolved_query}\n\nRespond with the evidence as plain text.", step.description)),
        ];
        let (content, usage) = ctx.complete(messages).await?;
        Ok((content.trim().to_string(), usage.total_tokens))
    }
}

#[async_trait]
impl ReasoningPattern for Rewoo {
    fn name(&self) -> &str {
        "rewoo"
    }

    async fn execute(&self, ctx: &PatternContext, task: &str) -> Result<ReasoningResult, PatternError> {
        let start = Instant::now();
        let mut result = ReasoningResult::new(self.name(), task);

        let plan_messages = vec![
            Message::system(
                "You are a planner. Break the task into steps, each producing one evidence variable \
                 named #E1, #E2, ... Steps may reference earlier variables in their query.",
            ),
            Message::user(format!(
                "Task: {task}\n\nRespond with JSON: {{\"steps\": [{{\"var\": \"#E1\", \"description\": \"...\", \"query\": \"...\"}}]}}, \
                 at most {max} steps.",
                max = self.config.max_steps
            )),
        ];
        let (plan_content, tokens) = ctx.complete(plan_messages).await?;
        result.total_tokens += tokens;
        let steps = self.parse_plan(task, &plan_content).into_iter().take(self.config.max_steps).collect::<Vec<_>>();
        result.steps.push(ReasoningStep::new(
            "plan",
            StepKind::Thought,
            steps.iter().map(|s| format!("{}: {}", s.var_name, s.description)).collect::<Vec<_>>().join("; "),
        ));

        let mut evidence: Vec<(String, String)> = Vec::new();
        for step in &steps {
            if ctx.is_cancelled() {
                return Err(PatternError::Cancelled);
            }
            let resolved_query = self.substitute(&step.query, &evidence);
            let (value, tokens) = self.run_worker(ctx, step, &resolved_query).await?;
            result.total_tokens += tokens;
            result.steps.push(
                ReasoningStep::new(step.var_name.clone(), StepKind::Observation, format!("{} = {}", step.var_name, value))
                    .with_tokens(tokens),
            );
            evidence.push((step.var_name.clone(), value));
        }

        let evidence_block = evidence.iter().map(|(var, value)| format!("{var} = {value}")).collect::<Vec<_>>().join("\n");
        let solver_messages = vec![
            Message::system("You are a solver. Use the plan and gathered evidence to produce the final answer."),
            Message::user(format!("Task: {task}\n\nEvidence:\n{evidence_block}\n\nRespond with the final answer as plain text.")),
        ];
        let (final_answer, tokens) = ctx.complete(solver_messages).await?;
        result.total_tokens += tokens;
        result.final_answer = final_answer.trim().to_string();
        result.confidence = if evidence.is_empty() { 0.3 } else { 0.8 };
        result.total_latency = start.elapsed();
        Ok(result)
    }
}
