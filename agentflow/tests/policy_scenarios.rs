//! Cross-module policy coverage: permission, cost, rate-limit, and audit middlewares wired
//! together through [`PolicyEngine`], plus the audit logger's durability guarantee across
//! `log_async` + `close`.

use std::sync::Arc;
use std::time::Duration;

use agentflow::policy::cost::{Budget, Period, Scope as CostScope};
use agentflow::policy::permission::{Decision, PermissionRule};
use agentflow::policy::{AuditAction, AuditEntry, AuditLogger, AuditQuery, PermissionContext, PolicyEngine};
use agentflow::ToolCall;

fn call(name: &str) -> ToolCall {
    ToolCall { id: "c1".into(), name: name.into(), arguments: "{}".into() }
}

/// Default-deny: with no rules configured, every tool call is denied before cost is ever
/// checked, and the denial is recorded in the audit trail.
#[tokio::test]
async fn default_deny_is_audited_before_cost_check() {
    let engine = PolicyEngine::new();
    let ctx = PermissionContext::new("agent-1", "search");

    let verdict = engine.check(&ctx, &call("search")).await;

    assert!(!verdict.allowed);
    let entries = engine.audit.query(&AuditQuery { agent_id: Some("agent-1".to_string()), ..Default::default() }).await;
    assert!(entries.iter().any(|e| e.action == AuditAction::PermissionCheck && e.decision == "deny"));
}

/// An allowed call against a budget set to its exact limit is admitted once, then the next
/// identical call against the same period is denied — budgets are calendar-period scoped, not
/// reset between calls.
#[tokio::test]
async fn budget_admits_until_limit_then_denies_within_same_period() {
    let engine = PolicyEngine::new();
    engine
        .permissions
        .add_rule(PermissionRule {
            id: "allow-all".into(),
            name: "allow-all".into(),
            tool_pattern: "*".into(),
            decision: Decision::Allow,
            priority: 1,
            conditions: vec![],
            valid_from: None,
            valid_until: None,
        })
        .await;
    engine
        .cost
        .add_budget(Budget {
            id: "daily-agent-1".into(),
            scope: CostScope::Agent,
            scope_id: "agent-1".into(),
            limit: 1.0,
            unit: "credits".into(),
            period: Period::Daily,
            alert_thresholds: vec![0.5],
            enabled: true,
        })
        .await;
    let ctx = PermissionContext::new("agent-1", "search");

    let first = engine.check(&ctx, &call("search")).await;
    assert!(first.allowed);
    engine.cost.record_cost(agentflow::policy::cost::CostRecord {
        id: "c1".into(),
        timestamp: ctx.request_at,
        agent_id: "agent-1".into(),
        user_id: String::new(),
        session_id: String::new(),
        tool_name: "search".into(),
        cost: first.estimated_cost,
        unit: "credits".into(),
    }).await;

    let second = engine.check(&ctx, &call("search")).await;
    assert!(!second.allowed);

    let entries = engine.audit.query(&AuditQuery { action: Some(AuditAction::CostCheck), ..Default::default() }).await;
    assert_eq!(entries.len(), 2);
}

/// Rate-limit denial at the policy layer is recorded as a `RateLimitHit` audit entry and never
/// reaches the cost check.
#[tokio::test]
async fn rate_limit_denial_short_circuits_before_cost_check() {
    let engine = PolicyEngine::new();
    engine
        .permissions
        .add_rule(PermissionRule {
            id: "allow-all".into(),
            name: "allow-all".into(),
            tool_pattern: "*".into(),
            decision: Decision::Allow,
            priority: 1,
            conditions: vec![],
            valid_from: None,
            valid_until: None,
        })
        .await;
    engine
        .rate_limits
        .configure_scope("tool:search", agentflow::RateLimitConfig { max_calls: 1, window: Duration::from_secs(60) })
        .await;
    let ctx = PermissionContext::new("agent-1", "search");

    let first = engine.check(&ctx, &call("search")).await;
    assert!(first.allowed);
    let second = engine.check(&ctx, &call("search")).await;
    assert!(!second.allowed);

    let entries = engine.audit.query(&AuditQuery { action: Some(AuditAction::RateLimitHit), ..Default::default() }).await;
    assert_eq!(entries.len(), 1);
    let cost_entries = engine.audit.query(&AuditQuery { action: Some(AuditAction::CostCheck), ..Default::default() }).await;
    assert_eq!(cost_entries.len(), 1, "only the first, allowed call should have reached the cost check");
}

/// Audit durability: every entry accepted by `log_async` before `close` is queryable afterward,
/// and `close` is idempotent.
#[tokio::test]
async fn every_async_logged_entry_is_present_after_close() {
    let memory_sink = Arc::new(agentflow::policy::audit::InMemorySink::new(64));
    let logger = AuditLogger::with_capacity(64, 2).with_memory_sink(Arc::clone(&memory_sink));

    for i in 0..20 {
        let entry = AuditEntry::new(format!("agent-{i}"), "search", AuditAction::ToolCall, "ok");
        logger.log_async(entry).await;
    }
    logger.close().await;
    logger.close().await; // idempotent

    let entries = memory_sink.entries().await;
    assert_eq!(entries.len(), 20);

    let err = logger.log(AuditEntry::new("agent-late", "search", AuditAction::ToolCall, "ok")).await;
    assert!(err.is_err());
}
