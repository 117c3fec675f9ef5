//! Concurrent executor: dispatches tool calls with timeouts, retries, rate limiting,
//! optional streaming, and optional dependency ordering.
//!
//! Spawn one task per call, collect `JoinHandle`s, await them in original order so output order
//! matches input order regardless of completion order.

mod chain;
mod context;
mod dependency;
mod parallel;

pub use chain::{resolve_references, ChainError};
pub use context::{CancelToken, ExecContext};
pub use dependency::{execute_dag, DagCall, DependencyError};
pub use parallel::{execute_parallel, ParallelConfig, ParallelMetrics};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::tool::{ToolCall, ToolResult, ToolStreamEvent};

#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("rate limit exceeded for tool {0}")]
    RateLimitExceeded(String),
    #[error("retry cancelled")]
    RetryCancelled,
}

impl ExecutorError {
    /// Non-retryable errors are identified by message prefix.
    pub fn is_retryable(message: &str) -> bool {
        !(message.starts_with("tool not found")
            || message.starts_with("invalid arguments")
            || message.starts_with("rate limit exceeded"))
    }
}

/// Retry/backoff knobs for the default executor.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_backoff: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 0, retry_delay: Duration::from_millis(100), retry_backoff: 2.0 }
    }
}

/// Runs all `calls` concurrently, preserving input order in the output.
pub async fn execute(ctx: &ExecContext, calls: &[ToolCall], retry: RetryConfig) -> Vec<ToolResult> {
    let mut handles = Vec::with_capacity(calls.len());
    for call in calls {
        let ctx = ctx.clone();
        let call = call.clone();
        handles.push(tokio::spawn(async move { execute_one(&ctx, &call, retry).await }));
    }
    let mut results = Vec::with_capacity(handles.len());
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(result) => results.push(result),
            Err(join_err) => {
                let call = &calls[i];
                results.push(ToolResult::err(
                    call.id.clone(),
                    call.name.clone(),
                    format!("tool task panicked: {join_err}"),
                    Duration::ZERO,
                ));
            }
        }
    }
    results
}

/// Single-call fast path.
pub async fn execute_one(ctx: &ExecContext, call: &ToolCall, retry: RetryConfig) -> ToolResult {
    let start = Instant::now();
    let (func, meta) = match ctx.registry.get(&call.name) {
        Ok(pair) => pair,
        Err(_) => {
            return ToolResult::err(
                call.id.clone(),
                call.name.clone(),
                format!("tool not found: {}", call.name),
                start.elapsed(),
            )
        }
    };

    if !ctx.registry.check_rate_limit(&call.name) {
        return ToolResult::err(
            call.id.clone(),
            call.name.clone(),
            format!("rate limit exceeded for tool {}; retry after backoff", call.name),
            start.elapsed(),
        );
    }

    if !call.arguments.is_empty() && serde_json::from_str::<serde_json::Value>(&call.arguments).is_err() {
        return ToolResult::err(
            call.id.clone(),
            call.name.clone(),
            format!("invalid arguments: not valid JSON for tool {}", call.name),
            start.elapsed(),
        );
    }

    let mut attempt = 0u32;
    loop {
        let outcome = run_with_timeout(&func, &call.arguments, meta.timeout).await;
        match outcome {
            Ok(value) => {
                return ToolResult::ok(call.id.clone(), call.name.clone(), value, start.elapsed());
            }
            Err(message) => {
                let retryable = ExecutorError::is_retryable(&message) && attempt < retry.max_retries;
                if !retryable {
                    return ToolResult::err(call.id.clone(), call.name.clone(), message, start.elapsed());
                }
                let delay = retry.retry_delay.mul_f64(retry.retry_backoff.powi(attempt as i32));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => {
                        return ToolResult::err(
                            call.id.clone(),
                            call.name.clone(),
                            "retry cancelled".to_string(),
                            start.elapsed(),
                        );
                    }
                }
                attempt += 1;
            }
        }
    }
}

/// Runs `func` on its own task bounded by `timeout`. The result channel is buffered (capacity
/// 1) so an abandoned worker's late, non-blocking send never leaks the task.
async fn run_with_timeout(
    func: &Arc<dyn crate::registry::ToolFn>,
    arguments: &str,
    timeout: Duration,
) -> Result<String, String> {
    let (tx, mut rx) = mpsc::channel::<Result<String, String>>(1);
    let func = Arc::clone(func);
    let arguments = arguments.to_string();
    tokio::spawn(async move {
        let result = func.call(&arguments).await;
        let _ = tx.try_send(result);
    });

    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(result)) => result,
        Ok(None) => Err("tool task ended without a result".to_string()),
        Err(_) => Err(format!("timeout after {timeout:?}")),
    }
}

/// Streaming single-call execution: `progress` on start, `output` on success, then
/// `complete`; `error` on failure. Channel closes after the terminal event.
pub fn execute_one_stream(
    ctx: ExecContext,
    call: ToolCall,
    retry: RetryConfig,
) -> mpsc::Receiver<ToolStreamEvent> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let _ = tx
            .send(ToolStreamEvent::Progress { tool_call_id: call.id.clone(), name: call.name.clone() })
            .await;
        let result = execute_one(&ctx, &call, retry).await;
        if result.is_error() {
            let _ = tx
                .send(ToolStreamEvent::Error {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    error: result.error.clone(),
                })
                .await;
        } else {
            let _ = tx
                .send(ToolStreamEvent::Output {
                    tool_call_id: call.id.clone(),
                    name: call.name.clone(),
                    data: result.result.clone(),
                })
                .await;
        }
        let _ = tx.send(ToolStreamEvent::Complete { result }).await;
    });
    rx
}

/// Monotonic counter used by the parallel executor's metrics; kept at module scope so
/// tests can construct independent executors without sharing global state.
pub(crate) fn new_counter() -> AtomicUsize {
    AtomicUsize::new(0)
}
