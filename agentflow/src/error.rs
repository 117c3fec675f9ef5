//! Crate-root error type aggregating every subsystem's local error enum.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::patterns::PatternError;
use crate::policy::{AuditError, CostError, PermissionError, RateLimitError};
use crate::react::ReactError;
use crate::registry::RegistryError;

/// Top-level error for AgentFlow driver- and constructor-level failures.
///
/// Per-call tool outcomes are carried in [`crate::tool::ToolResult::error`], not here —
/// a batch of tool calls never short-circuits into an `Err(AgentError)`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Cost(#[from] CostError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    React(#[from] ReactError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("llm transport error: {0}")]
    LlmTransport(String),

    #[error("operation cancelled")]
    Cancelled,
}
