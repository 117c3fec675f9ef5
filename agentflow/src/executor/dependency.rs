//! Dependency-aware executor: a DAG of tool calls, each naming predecessor ids whose
//! results it may substitute into its own arguments via [`crate::executor::chain`].
//!
//! Cycles are not pre-validated: a call whose dependencies never complete waits
//! forever unless the ambient context is cancelled, matching the spec's "waiters timing out
//! via the context" wording.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Notify, Semaphore};

use super::chain::resolve_references;
use super::context::ExecContext;
use super::{execute_one, RetryConfig};
use crate::tool::{ToolCall, ToolResult};

#[derive(Debug, Error, Clone)]
pub enum DependencyError {
    #[error("duplicate call id in DAG: {0}")]
    DuplicateId(String),
}

/// One node in a dependency-ordered batch.
#[derive(Clone)]
pub struct DagCall {
    pub call: ToolCall,
    /// Ids of predecessor calls that must complete before this one runs.
    pub depends_on: Vec<String>,
}

impl DagCall {
    pub fn new(call: ToolCall) -> Self {
        Self { call, depends_on: Vec::new() }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.depends_on.extend(ids);
        self
    }
}

struct Barrier {
    notify: Notify,
}

/// Runs `calls` honoring `depends_on` edges: a call's concurrency-semaphore acquisition
/// happens only after all of its declared predecessors have completed, and its arguments are
/// first rewritten via [`resolve_references`] against the completed predecessors' results.
/// Output preserves the input order, same as [`super::execute`].
pub async fn execute_dag(
    ctx: &ExecContext,
    calls: Vec<DagCall>,
    retry: RetryConfig,
    max_concurrency: usize,
) -> Result<Vec<ToolResult>, DependencyError> {
    let mut seen = HashSet::with_capacity(calls.len());
    for dc in &calls {
        if !seen.insert(dc.call.id.clone()) {
            return Err(DependencyError::DuplicateId(dc.call.id.clone()));
        }
    }

    let barriers: Arc<HashMap<String, Barrier>> = Arc::new(
        calls.iter().map(|dc| (dc.call.id.clone(), Barrier { notify: Notify::new() })).collect(),
    );
    let completed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let results: Arc<Mutex<HashMap<String, serde_json::Value>>> = Arc::new(Mutex::new(HashMap::new()));
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let mut handles = Vec::with_capacity(calls.len());
    for dc in calls.iter().cloned() {
        let ctx = ctx.clone();
        let barriers = Arc::clone(&barriers);
        let completed = Arc::clone(&completed);
        let results_map = Arc::clone(&results);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            for dep in &dc.depends_on {
                wait_for(dep, &barriers, &completed, &ctx).await;
            }

            let resolved_args = {
                let map = results_map.lock().unwrap();
                resolve_references(&dc.call.arguments, &map).unwrap_or(dc.call.arguments.clone())
            };
            let call = ToolCall { id: dc.call.id.clone(), name: dc.call.name.clone(), arguments: resolved_args };

            let _permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = ctx.cancel.cancelled() => None,
            };

            let result = execute_one(&ctx, &call, retry).await;

            if !result.is_error() {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&result.result) {
                    results_map.lock().unwrap().insert(dc.call.id.clone(), value);
                }
            }
            completed.lock().unwrap().insert(dc.call.id.clone());
            if let Some(barrier) = barriers.get(&dc.call.id) {
                barrier.notify.notify_waiters();
            }
            result
        }));
    }

    let mut out = Vec::with_capacity(handles.len());
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(result) => out.push(result),
            Err(join_err) => {
                let call = &calls[i].call;
                out.push(ToolResult::err(
                    call.id.clone(),
                    call.name.clone(),
                    format!("tool task panicked: {join_err}"),
                    Duration::ZERO,
                ));
            }
        }
    }
    Ok(out)
}

/// Waits until `dep` is present in `completed`, or the context is cancelled. Re-checks the
/// completed set before and after registering for notification to avoid the classic missed
/// wakeup race.
async fn wait_for(
    dep: &str,
    barriers: &HashMap<String, Barrier>,
    completed: &Mutex<HashSet<String>>,
    ctx: &ExecContext,
) {
    loop {
        if completed.lock().unwrap().contains(dep) {
            return;
        }
        let Some(barrier) = barriers.get(dep) else {
            // Unknown predecessor id: nothing will ever notify it; treat as satisfied rather
            // than hanging forever on a malformed graph.
            return;
        };
        let notified = barrier.notify.notified();
        if completed.lock().unwrap().contains(dep) {
            return;
        }
        tokio::select! {
            _ = notified => {}
            _ = ctx.cancel.cancelled() => return,
        }
    }
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
    async fn runs_successor_after_predecessor_with_resolved_args() {
        let registry = ToolRegistry::new();
        registry
            .register(
                "weather",
                StdArc::new(|_args: String| async move { Ok(json!({"location":"Beijing","temperature":22}).to_string()) }),
                ToolMeta::new(schema("weather")).with_timeout(Duration::from_secs(5)),
            )
            .unwrap();
        registry
            .register(
                "report",
                StdArc::new(|args: String| async move { Ok(args) }),
                ToolMeta::new(schema("report")).with_timeout(Duration::from_secs(5)),
            )
            .unwrap();
        let ctx = ExecContext::new(Arc::new(registry));

        let calls = vec![
            DagCall::new(ToolCall { id: "call_1".into(), name: "weather".into(), arguments: String::new() }),
            DagCall::new(ToolCall {
                id: "call_2".into(),
                name: "report".into(),
                arguments: json!({"city": "${call_1.location}"}).to_string(),
            })
            .depends_on(["call_1".to_string()]),
        ];
        let results = execute_dag(&ctx, calls, RetryConfig::default(), 4).await.unwrap();
        assert_eq!(results.len(), 2);
        let report: serde_json::Value = serde_json::from_str(&results[1].result).unwrap();
        assert_eq!(report["city"], "Beijing");
    }

    #[tokio::test]
    async fn duplicate_ids_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register("echo", StdArc::new(|a: String| async move { Ok(a) }), ToolMeta::new(schema("echo")))
            .unwrap();
        let ctx = ExecContext::new(Arc::new(registry));
        let calls = vec![
            DagCall::new(ToolCall { id: "c1".into(), name: "echo".into(), arguments: String::new() }),
            DagCall::new(ToolCall { id: "c1".into(), name: "echo".into(), arguments: String::new() }),
        ];
        assert!(matches!(execute_dag(&ctx, calls, RetryConfig::default(), 4).await, Err(DependencyError::DuplicateId(_))));
    }
}
