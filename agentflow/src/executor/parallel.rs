//! Parallel executor : concurrency semaphore, global cross-call
//! timeout, fail-fast cancellation, and atomic metric counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use super::context::{CancelToken, ExecContext};
use super::{execute_one, RetryConfig};
use crate::tool::{ToolCall, ToolResult};

/// Configuration for [`execute_parallel`].
#[derive(Clone, Copy, Debug)]
pub struct ParallelConfig {
    pub max_concurrency: usize,
    pub execution_timeout: Duration,
    pub fail_fast: bool,
    pub retry: RetryConfig,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            execution_timeout: Duration::from_secs(60),
            fail_fast: false,
            retry: RetryConfig::default(),
        }
    }
}

/// Atomic counters accumulated across one [`execute_parallel`] call.
#[derive(Default)]
pub struct ParallelMetrics {
    pub total: AtomicUsize,
    pub success: AtomicUsize,
    pub failed: AtomicUsize,
    pub total_duration_nanos: AtomicU64,
}

impl ParallelMetrics {
    pub fn total_duration(&self) -> Duration {
        Duration::from_nanos(self.total_duration_nanos.load(Ordering::Relaxed))
    }
}

/// Runs `calls` concurrently bounded by `config.max_concurrency`, enforcing a global
/// `execution_timeout` over the whole batch. When `fail_fast` is set, the first error cancels
/// remaining in-flight and not-yet-started calls, which are reported as cancelled rather than
/// silently dropped (partial-result collection). Preserves input order.
pub async fn execute_parallel(
    ctx: &ExecContext,
    calls: &[ToolCall],
    config: ParallelConfig,
) -> (Vec<ToolResult>, ParallelMetrics) {
    let metrics = ParallelMetrics::default();
    let local_cancel = CancelToken::new();
    // Forward the caller's cancellation into this batch's local token so fail-fast doesn't
    // reach outside this call.
    {
        let parent = ctx.cancel.clone();
        let local = local_cancel.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            local.cancel();
        });
    }
    let local_ctx = ExecContext { registry: Arc::clone(&ctx.registry), cancel: local_cancel.clone() };
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));

    let batch = async {
        let mut handles = Vec::with_capacity(calls.len());
        for call in calls {
            let ctx = local_ctx.clone();
            let call = call.clone();
            let semaphore = Arc::clone(&semaphore);
            let fail_fast = config.fail_fast;
            let cancel_on_fail = local_cancel.clone();
            let retry = config.retry;
            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = ctx.cancel.cancelled() => None,
                };
                if permit.is_none() {
                    return ToolResult::err(call.id.clone(), call.name.clone(), "cancelled".to_string(), Duration::ZERO);
                }
                let start = Instant::now();
                let result = execute_one(&ctx, &call, retry).await;
                if result.is_error() && fail_fast {
                    cancel_on_fail.cancel();
                }
                let _ = start;
                result
            }));
        }
        let mut out = Vec::with_capacity(handles.len());
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => out.push(result),
                Err(join_err) => {
                    let call = &calls[i];
                    out.push(ToolResult::err(
                        call.id.clone(),
                        call.name.clone(),
                        format!("tool task panicked: {join_err}"),
                        Duration::ZERO,
                    ));
                }
            }
        }
        out
    };

    let results = match tokio::time::timeout(config.execution_timeout, batch).await {
        Ok(results) => results,
        Err(_) => {
            local_cancel.cancel();
            calls
                .iter()
                .map(|c| {
                    ToolResult::err(
                        c.id.clone(),
                        c.name.clone(),
                        format!("execution timeout after {:?}", config.execution_timeout),
                        config.execution_timeout,
                    )
                })
                .collect()
        }
    };

    for r in &results {
        metrics.total.fetch_add(1, Ordering::Relaxed);
        if r.is_error() {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            metrics.success.fetch_add(1, Ordering::Relaxed);
        }
        metrics.total_duration_nanos.fetch_add(r.duration.as_nanos() as u64, Ordering::Relaxed);
    }

    (results, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ToolMeta, ToolRegistry};
    use serde_json::json;
    use std::sync::Arc as StdArc;

    fn schema(name: &str) -> crate::tool::ToolSchema {
        crate::tool::ToolSchema { name: name.to_string(), description: String::new(), parameters: json!({}) }
    }

    #[tokio::test]
    async fn metrics_count_success_and_failure() {
        let registry = ToolRegistry::new();
        registry
            .register("ok", StdArc::new(|a: String| async move { Ok(a) }), ToolMeta::new(schema("ok")))
            .unwrap();
        registry
            .register(
                "bad",
                StdArc::new(|_a: String| async move { Err("boom".to_string()) }),
                ToolMeta::new(schema("bad")),
            )
            .unwrap();
        let ctx = ExecContext::new(Arc::new(registry));
        let calls = vec![
            ToolCall { id: "c1".into(), name: "ok".into(), arguments: String::new() },
            ToolCall { id: "c2".into(), name: "bad".into(), arguments: String::new() },
        ];
        let (results, metrics) = execute_parallel(&ctx, &calls, ParallelConfig::default()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(metrics.total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.success.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn fail_fast_cancels_remaining() {
        let registry = ToolRegistry::new();
        registry
            .register(
                "bad",
                StdArc::new(|_a: String| async move { Err("boom".to_string()) }),
                ToolMeta::new(schema("bad")),
            )
            .unwrap();
        registry
            .register(
                "slow",
                StdArc::new(|_a: String| async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok("late".to_string())
                }),
                ToolMeta::new(schema("slow")).with_timeout(Duration::from_secs(5)),
            )
            .unwrap();
        let ctx = ExecContext::new(Arc::new(registry));
        let calls = vec![
            ToolCall { id: "c1".into(), name: "bad".into(), arguments: String::new() },
            ToolCall { id: "c2".into(), name: "slow".into(), arguments: String::new() },
        ];
        let config = ParallelConfig { fail_fast: true, max_concurrency: 2, ..Default::default() };
        let (results, _) = execute_parallel(&ctx, &calls, config).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_error());
    }

    #[tokio::test]
    async fn global_timeout_reports_remaining_as_timed_out() {
        let registry = ToolRegistry::new();
        registry
            .register(
                "hangs",
                StdArc::new(|_a: String| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok("late".to_string())
                }),
                ToolMeta::new(schema("hangs")).with_timeout(Duration::from_secs(10)),
            )
            .unwrap();
        let ctx = ExecContext::new(Arc::new(registry));
        let calls = vec![ToolCall { id: "c1".into(), name: "hangs".into(), arguments: String::new() }];
        let config = ParallelConfig { execution_timeout: Duration::from_millis(30), ..Default::default() };
        let (results, _) = execute_parallel(&ctx, &calls, config).await;
        assert!(results[0].error.starts_with("execution timeout"));
    }
}
