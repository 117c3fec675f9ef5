//! Policy middleware stack: permission (RBAC), cost (budgets), rate-limit
//! (scoped algorithmic limiters), and audit (decision trail). Each is independently usable;
//! [`PolicyEngine`] bundles all four for the common case of checking every gate before a tool
//! call runs.

pub mod audit;
pub mod cost;
pub mod permission;
pub mod rate_limit;

pub use audit::{AuditAction, AuditEntry, AuditError, AuditLogger, AuditQuery, AuditSink};
pub use cost::{Budget, CostController, CostError, CostRecord, Period, Scope as CostScope};
pub use permission::{Decision, PermissionContext, PermissionError, PermissionManager};
pub use rate_limit::{RateLimitAction, RateLimitError, RateLimitManager, RateLimitRule, RateLimitScope};

use std::sync::Arc;

use crate::tool::ToolCall;

/// One verdict covering every policy gate checked for a single tool call.
#[derive(Debug)]
pub struct PolicyVerdict {
    pub allowed: bool,
    pub reason: String,
    pub estimated_cost: f64,
}

/// Bundles the four policy middlewares behind one `check` call, in the order permission, then
/// rate limit, then cost (audit always fires last, regardless of the other three's outcome, so
/// every decision is recorded).
#[derive(Default)]
pub struct PolicyEngine {
    pub permissions: PermissionManager,
    pub cost: CostController,
    pub rate_limits: RateLimitManager,
    pub audit: AuditLogger,
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn check(&self, ctx: &PermissionContext, call: &ToolCall) -> PolicyVerdict {
        let permission = self.permissions.check_permission(ctx).await;
        if permission.decision != Decision::Allow {
            let verdict = PolicyVerdict { allowed: false, reason: permission.reason.clone(), estimated_cost: 0.0 };
            self.record(ctx, call, &verdict, AuditAction::PermissionCheck).await;
            return verdict;
        }

        if let Err(err) = self.rate_limits.check_all(&ctx.agent_id, &ctx.tool_name).await {
            let verdict = PolicyVerdict { allowed: false, reason: err.to_string(), estimated_cost: 0.0 };
            self.record(ctx, call, &verdict, AuditAction::RateLimitHit).await;
            return verdict;
        }

        let cost = self.cost.calculate_cost(&ctx.tool_name, &call.arguments).await;
        let budget = self.cost.check_budget(ctx, cost).await;
        let verdict = PolicyVerdict { allowed: budget.allowed, reason: budget.reason.clone(), estimated_cost: cost };
        self.record(ctx, call, &verdict, AuditAction::CostCheck).await;
        if let Some(alert) = &budget.alert {
            let entry = AuditEntry::new(ctx.agent_id.clone(), call.name.clone(), AuditAction::CostAlert, format!("{:?}", alert.level))
                .with_details(format!("budget {} at {:.1}%", alert.budget_id, alert.percent));
            let _ = self.audit.log(entry).await;
        }
        verdict
    }

    async fn record(&self, ctx: &PermissionContext, call: &ToolCall, verdict: &PolicyVerdict, action: AuditAction) {
        let decision = if verdict.allowed { "allow" } else { "deny" };
        let entry = AuditEntry::new(ctx.agent_id.clone(), call.name.clone(), action, decision)
            .with_details(verdict.reason.clone());
        let _ = self.audit.log(entry).await;
    }
}

pub fn default_audit_logger() -> Arc<AuditLogger> {
    Arc::new(AuditLogger::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolCall;

    #[tokio::test]
    async fn default_deny_blocks_before_cost_is_checked() {
        let engine = PolicyEngine::new();
        let ctx = PermissionContext::new("agent-1", "search");
        let call = ToolCall { id: "c1".into(), name: "search".into(), arguments: "{}".into() };
        let verdict = engine.check(&ctx, &call).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.estimated_cost, 0.0);
    }

    #[tokio::test]
    async fn allowed_call_passes_through_cost_check() {
        let engine = PolicyEngine::new();
        engine
            .permissions
            .add_rule(permission::PermissionRule {
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
        let ctx = PermissionContext::new("agent-1", "search");
        let call = ToolCall { id: "c1".into(), name: "search".into(), arguments: "{}".into() };
        let verdict = engine.check(&ctx, &call).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.estimated_cost, 1.0);
    }
}
