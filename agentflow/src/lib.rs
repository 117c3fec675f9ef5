//! # AgentFlow
//!
//! A tool execution control plane and ReAct reasoning loop for LLM-driven agents.
//!
//! ## Design principles
//!
//! - **Layered control plane**: a [`registry::ToolRegistry`] of callable tools sits behind a
//!   concurrent [`executor`] (default, parallel, dependency-DAG, and reference-resolving chain
//!   variants), itself wrapped by a [`policy::PolicyEngine`] (permission/RBAC, cost/budget,
//!   rate-limit, audit logging) before the [`react::ReactDriver`] ever calls a tool.
//! - **Tolerant by default**: malformed LLM output is parsed best-effort ([`patterns::extract_json`])
//!   rather than crashing a reasoning pattern; per-call tool failures are carried in
//!   [`tool::ToolResult::error`], never raised as an exception for the whole batch.
//! - **Pluggable reasoning**: six strategies (Tree-of-Thought, Plan-and-Execute, ReWOO,
//!   Reflexion, Iterative Deepening, Dynamic Planner) share one [`patterns::ReasoningPattern`]
//!   trait and are addressable by name through a [`patterns::PatternRegistry`].
//!
//! ## Main modules
//!
//! - [`registry`]: [`registry::ToolRegistry`], [`registry::ToolFn`], [`registry::ToolMeta`] — register and look up callable tools.
//! - [`limiter`]: [`limiter::RateLimiter`] trait plus token-bucket, sliding-window, and fixed-window implementations.
//! - [`executor`]: [`executor::execute`] (default), [`executor::execute_parallel`], [`executor::execute_dag`], and chain reference resolution ([`executor::resolve_references`]).
//! - [`policy`]: [`policy::PolicyEngine`] bundling permission, cost, rate-limit, and audit middlewares.
//! - [`react`]: [`react::ReactDriver`] — the blocking and streaming reason-act-observe loop.
//! - [`patterns`]: [`patterns::ReasoningPattern`], [`patterns::PatternRegistry`], and the six concrete strategies.
//! - [`llm`]: [`llm::LlmClient`] trait and wire-shaped request/response/chunk types.
//! - [`message`]: [`Message`] — chat message shapes shared by the LLM contract and the ReAct driver.
//! - [`config`]: [`config::RuntimeConfig`] — environment-driven executor/ReAct configuration.
//! - [`export`]: [`export::to_deployment_manifest`] — Kubernetes `Deployment`-shaped manifest export.
//!
//! Key types are re-exported at crate root: `use agentflow::{AgentError, Message, ToolCall, ToolResult};`.

pub mod config;
pub mod error;
pub mod executor;
pub mod export;
pub mod limiter;
pub mod llm;
pub mod message;
pub mod patterns;
pub mod policy;
pub mod react;
pub mod registry;
pub mod tool;

pub use config::RuntimeConfig;
pub use error::AgentError;
pub use executor::{execute, execute_dag, execute_parallel, resolve_references, CancelToken, ExecContext};
pub use export::{to_deployment_manifest, DeploymentSpec};
pub use limiter::{build_limiter, LimiterStrategy, RateLimitConfig, RateLimiter};
pub use llm::{ChatRequest, ChatResponse, LlmClient, LlmUsage};
pub use message::Message;
pub use patterns::{
    DynamicPlanner, IterativeDeepening, PatternContext, PatternRegistry, PlanAndExecute,
    ReasoningPattern, ReasoningResult, Reflexion, Rewoo, TreeOfThought,
};
pub use policy::{AuditLogger, CostController, PermissionManager, PolicyEngine, RateLimitManager};
pub use react::{ReactConfig, ReactDriver, ReactOutcome};
pub use registry::ToolRegistry;
pub use tool::{ToolCall, ToolResult, ToolSchema};
