//! Cross-module executor coverage: the end-to-end scenarios that exercise the registry,
//! executor, and chain reference resolution together rather than one function in isolation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentflow::{execute, ExecContext, RateLimitConfig};
use agentflow::registry::{ToolMeta, ToolRegistry};
use agentflow::{resolve_references, ToolCall};
use agentflow::executor::RetryConfig;
use agentflow::tool::ToolSchema;
use serde_json::json;

fn schema(name: &str) -> ToolSchema {
    ToolSchema { name: name.to_string(), description: String::new(), parameters: json!({}) }
}

/// Scenario A: happy-path tool call.
#[tokio::test]
async fn happy_path_tool_call_returns_echoed_text() {
    let registry = ToolRegistry::new();
    registry
        .register(
            "echo",
            Arc::new(|args: String| async move { Ok(args) }),
            ToolMeta::new(schema("echo")).with_timeout(Duration::from_secs(5)),
        )
        .unwrap();
    let ctx = ExecContext::new(Arc::new(registry));
    let calls = vec![ToolCall { id: "c1".into(), name: "echo".into(), arguments: "{\"text\":\"hi\"}".into() }];

    let results = execute(&ctx, &calls, RetryConfig::default()).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id, "c1");
    assert_eq!(results[0].result, "{\"text\":\"hi\"}");
    assert!(results[0].error.is_empty());
}

/// Scenario B: a tool that fails transiently twice succeeds on the third attempt, and the
/// configured retry policy is honored exactly (no extra invocations once it succeeds).
#[tokio::test]
async fn retry_after_transient_failure_succeeds_on_third_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));
    let registry = ToolRegistry::new();
    let attempts_clone = Arc::clone(&attempts);
    registry
        .register(
            "flaky",
            Arc::new(move |_args: String| {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err("transient".to_string())
                    } else {
                        Ok("ok".to_string())
                    }
                }
            }),
            ToolMeta::new(schema("flaky")).with_timeout(Duration::from_secs(5)),
        )
        .unwrap();
    let ctx = ExecContext::new(Arc::new(registry));
    let calls = vec![ToolCall { id: "c1".into(), name: "flaky".into(), arguments: String::new() }];
    let retry = RetryConfig { max_retries: 3, retry_delay: Duration::from_millis(10), retry_backoff: 1.5 };

    let results = execute(&ctx, &calls, retry).await;

    assert!(results[0].error.is_empty());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

/// Scenario C: 11 sequential calls against a tool rate-limited to 10 per second yield 10
/// successes followed by a rejection whose message starts with "rate limit exceeded".
#[tokio::test]
async fn eleventh_call_within_window_is_rate_limited() {
    let registry = ToolRegistry::new();
    registry
        .register(
            "limited",
            Arc::new(|args: String| async move { Ok(args) }),
            ToolMeta::new(schema("limited"))
                .with_timeout(Duration::from_secs(5))
                .with_rate_limit(RateLimitConfig { max_calls: 10, window: Duration::from_secs(1) }),
        )
        .unwrap();
    let ctx = ExecContext::new(Arc::new(registry));

    let mut results = Vec::new();
    for i in 0..11 {
        let call = ToolCall { id: format!("c{i}"), name: "limited".into(), arguments: String::new() };
        let mut batch = execute(&ctx, &[call], RetryConfig::default()).await;
        results.push(batch.remove(0));
    }

    let successes = results.iter().filter(|r| r.error.is_empty()).count();
    assert_eq!(successes, 10);
    assert!(results[10].error.starts_with("rate limit exceeded"));
}

/// Scenario F: chain reference resolution substitutes whole-value and embedded placeholders,
/// leaves unknown references untouched, and is idempotent when re-applied.
#[tokio::test]
async fn chain_reference_resolution_matches_documented_shape() {
    let mut results: std::collections::HashMap<String, serde_json::Value> = std::collections::HashMap::new();
    results.insert("call_1".to_string(), json!({"location": "Beijing", "temperature": 22}));

    let arguments = json!({
        "city": "${call_1.location}",
        "msg": "city=${call_1.location}",
        "payload": "${call_1}",
        "missing": "${call_2.x}",
    })
    .to_string();

    let resolved_once = resolve_references(&arguments, &results).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&resolved_once).unwrap();
    assert_eq!(parsed["city"], "Beijing");
    assert_eq!(parsed["msg"], "city=Beijing");
    assert_eq!(parsed["payload"], json!({"location": "Beijing", "temperature": 22}));
    assert_eq!(parsed["missing"], "${call_2.x}");

    let resolved_twice = resolve_references(&resolved_once, &results).unwrap();
    assert_eq!(resolved_once, resolved_twice);
}
