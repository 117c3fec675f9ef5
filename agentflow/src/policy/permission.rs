//! Permission manager: RBAC-flavored rule evaluation producing allow/deny/require_approval,
//! following a specificity-ordered rule matching, most-restrictive-wins tie-break decision
//! shape generalized to priority-ordered rules with conditions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, Clone)]
pub enum PermissionError {
    #[error("permission denied for tool {tool}: {reason}")]
    Denied { tool: String, reason: String },
    #[error("approval required for tool {tool}: {reason}")]
    ApprovalRequired { tool: String, reason: String },
    #[error("approval handler failed: {0}")]
    ApprovalHandlerFailed(String),
}

/// Ambient permission context attached to a request. Never mutated by callees.
#[derive(Clone, Debug)]
pub struct PermissionContext {
    pub agent_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub tool_name: String,
    pub arguments: String,
    pub metadata: HashMap<String, String>,
    pub request_ip: Option<String>,
    pub request_at: DateTime<Utc>,
    pub trace_id: String,
    pub session_id: String,
}

impl PermissionContext {
    pub fn new(agent_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            user_id: String::new(),
            roles: Vec::new(),
            tool_name: tool_name.into(),
            arguments: String::new(),
            metadata: HashMap::new(),
            request_ip: None,
            request_at: Utc::now(),
            trace_id: String::new(),
            session_id: String::new(),
        }
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "agent_id" => Some(self.agent_id.clone()),
            "user_id" => Some(self.user_id.clone()),
            "request_ip" => self.request_ip.clone(),
            "hour" => Some(self.request_at.hour().to_string()),
            _ => self.metadata.get(name).cloned(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    RequireApproval,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionOperator {
    Eq,
    Ne,
    Contains,
    Matches,
}

#[derive(Clone, Debug)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: String,
}

impl Condition {
    fn holds(&self, ctx: &PermissionContext) -> bool {
        let actual = ctx.field(&self.field).unwrap_or_default();
        match self.operator {
            ConditionOperator::Eq => actual == self.value,
            ConditionOperator::Ne => actual != self.value,
            ConditionOperator::Contains => actual.contains(&self.value),
            ConditionOperator::Matches => glob_match(&self.value, &actual),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PermissionRule {
    pub id: String,
    pub name: String,
    pub tool_pattern: String,
    pub decision: Decision,
    pub priority: i32,
    pub conditions: Vec<Condition>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl PermissionRule {
    fn matches_tool(&self, tool_name: &str) -> bool {
        glob_match(&self.tool_pattern, tool_name)
    }

    fn valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from.map(|f| now >= f).unwrap_or(true) && self.valid_until.map(|u| now <= u).unwrap_or(true)
    }
}

/// A role: a named bundle of rule ids, optionally inheriting from parent roles. Parent-role
/// cycles must be tolerated by the expansion walk.
#[derive(Clone, Debug)]
pub struct Role {
    pub id: String,
    pub parent_roles: Vec<String>,
    pub permission_rule_ids: Vec<String>,
}

/// Per-agent override list: explicit deny wins over allow. `inherit_from` chains
/// to another agent's override, recursing with cycle protection.
#[derive(Clone, Debug, Default)]
pub struct AgentOverride {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub inherit_from: Option<String>,
}

#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Requests out-of-band approval for `ctx` against the winning `rule`. Returns an
    /// approval id on success; failure downgrades the decision to deny.
    async fn request_approval(&self, ctx: &PermissionContext, rule: &PermissionRule) -> Result<String, String>;
}

#[derive(Debug)]
pub struct PermissionCheckResult {
    pub decision: Decision,
    pub matched_rule: Option<String>,
    pub reason: String,
    pub approval_id: Option<String>,
    pub latency: Duration,
}

/// Matches `*`, `prefix*`, `*suffix`, or an exact string (the same glob grammar `PermissionRule.tool_pattern` uses).
pub fn glob_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if let Some(suffix) = prefix.strip_prefix('*') {
            // `*middle*`-style double wildcard: treat as substring containment.
            return value.contains(suffix);
        }
        return value.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return value.ends_with(suffix);
    }
    pattern == value
}

#[derive(Default)]
pub struct PermissionManager {
    rules: RwLock<HashMap<String, PermissionRule>>,
    roles: RwLock<HashMap<String, Role>>,
    user_roles: RwLock<HashMap<String, Vec<String>>>,
    overrides: RwLock<HashMap<String, AgentOverride>>,
    approval_handler: Option<Arc<dyn ApprovalHandler>>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_approval_handler(mut self, handler: Arc<dyn ApprovalHandler>) -> Self {
        self.approval_handler = Some(handler);
        self
    }

    pub async fn add_rule(&self, rule: PermissionRule) {
        self.rules.write().await.insert(rule.id.clone(), rule);
    }

    pub async fn add_role(&self, role: Role) {
        self.roles.write().await.insert(role.id.clone(), role);
    }

    pub async fn assign_role(&self, user_id: impl Into<String>, role_id: impl Into<String>) {
        self.user_roles.write().await.entry(user_id.into()).or_default().push(role_id.into());
    }

    pub async fn set_override(&self, agent_id: impl Into<String>, over: AgentOverride) {
        self.overrides.write().await.insert(agent_id.into(), over);
    }

    /// Evaluates `ctx` against agent overrides, then role-expanded rules.
    pub async fn check_permission(&self, ctx: &PermissionContext) -> PermissionCheckResult {
        let start = Instant::now();

        if let Some(decision) = self.check_overrides(&ctx.agent_id, &ctx.tool_name, &mut HashSet::new()).await {
            return PermissionCheckResult {
                decision,
                matched_rule: None,
                reason: "agent-specific override".to_string(),
                approval_id: None,
                latency: start.elapsed(),
            };
        }

        let roles = self.expand_roles(ctx).await;
        let rule_ids: Vec<String> = {
            let roles_guard = self.roles.read().await;
            let mut ids = Vec::new();
            for role_id in &roles {
                if let Some(role) = roles_guard.get(role_id) {
                    ids.extend(role.permission_rule_ids.iter().cloned());
                }
            }
            ids
        };

        let mut candidates: Vec<PermissionRule> = {
            let rules = self.rules.read().await;
            let mut explicit: Vec<PermissionRule> = rules
                .values()
                .filter(|r| r.matches_tool(&ctx.tool_name) && r.valid_at(ctx.request_at))
                .cloned()
                .collect();
            for id in &rule_ids {
                if let Some(rule) = rules.get(id) {
                    if rule.matches_tool(&ctx.tool_name) && rule.valid_at(ctx.request_at) && !explicit.iter().any(|r| r.id == rule.id) {
                        explicit.push(rule.clone());
                    }
                }
            }
            explicit
        };
        // Stable sort on ties: descending priority.
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

        for rule in &candidates {
            if rule.conditions.iter().all(|c| c.holds(ctx)) {
                return self.resolve_decision(ctx, rule, start).await;
            }
        }

        PermissionCheckResult {
            decision: Decision::Deny,
            matched_rule: None,
            reason: "no matching rule; default deny".to_string(),
            approval_id: None,
            latency: start.elapsed(),
        }
    }

    async fn resolve_decision(&self, ctx: &PermissionContext, rule: &PermissionRule, start: Instant) -> PermissionCheckResult {
        match rule.decision {
            Decision::RequireApproval => {
                if let Some(handler) = &self.approval_handler {
                    match handler.request_approval(ctx, rule).await {
                        Ok(approval_id) => PermissionCheckResult {
                            decision: Decision::RequireApproval,
                            matched_rule: Some(rule.id.clone()),
                            reason: format!("rule {} requires approval", rule.name),
                            approval_id: Some(approval_id),
                            latency: start.elapsed(),
                        },
                        Err(err) => PermissionCheckResult {
                            decision: Decision::Deny,
                            matched_rule: Some(rule.id.clone()),
                            reason: format!("approval handler failed: {err}"),
                            approval_id: None,
                            latency: start.elapsed(),
                        },
                    }
                } else {
                    PermissionCheckResult {
                        decision: Decision::RequireApproval,
                        matched_rule: Some(rule.id.clone()),
                        reason: format!("rule {} requires approval", rule.name),
                        approval_id: None,
                        latency: start.elapsed(),
                    }
                }
            }
            decision => PermissionCheckResult {
                decision,
                matched_rule: Some(rule.id.clone()),
                reason: format!("matched rule {}", rule.name),
                approval_id: None,
                latency: start.elapsed(),
            },
        }
    }

    async fn check_overrides(&self, agent_id: &str, tool_name: &str, visited: &mut HashSet<String>) -> Option<Decision> {
        if !visited.insert(agent_id.to_string()) {
            return None;
        }
        let overrides = self.overrides.read().await;
        let over = overrides.get(agent_id)?;
        if over.deny.iter().any(|p| glob_match(p, tool_name)) {
            return Some(Decision::Deny);
        }
        if over.allow.iter().any(|p| glob_match(p, tool_name)) {
            return Some(Decision::Allow);
        }
        if let Some(parent) = &over.inherit_from {
            let parent = parent.clone();
            drop(overrides);
            return Box::pin(self.check_overrides(&parent, tool_name, visited)).await;
        }
        None
    }

    /// BFS role expansion: explicit context roles ∪ user's assigned roles ∪ transitively
    /// inherited parents, with a visited set so cyclic parent graphs terminate.
    async fn expand_roles(&self, ctx: &PermissionContext) -> Vec<String> {
        let mut queue: std::collections::VecDeque<String> = ctx.roles.iter().cloned().collect();
        if let Some(assigned) = self.user_roles.read().await.get(&ctx.user_id) {
            queue.extend(assigned.iter().cloned());
        }
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        let roles = self.roles.read().await;
        while let Some(role_id) = queue.pop_front() {
            if !visited.insert(role_id.clone()) {
                continue;
            }
            out.push(role_id.clone());
            if let Some(role) = roles.get(&role_id) {
                for parent in &role.parent_roles {
                    if !visited.contains(parent) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }
        out
    }
}

/// Wraps a tool function with a permission check, returning the tool's result on allow and a
/// typed [`PermissionError`] on deny/require_approval.
pub async fn permission_middleware<F, Fut>(
    manager: &PermissionManager,
    ctx: &PermissionContext,
    inner: F,
) -> Result<String, PermissionError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<String, String>>,
{
    let check = manager.check_permission(ctx).await;
    match check.decision {
        Decision::Allow => inner().await.map_err(|e| PermissionError::Denied { tool: ctx.tool_name.clone(), reason: e }),
        Decision::Deny => Err(PermissionError::Denied { tool: ctx.tool_name.clone(), reason: check.reason }),
        Decision::RequireApproval => Err(PermissionError::ApprovalRequired { tool: ctx.tool_name.clone(), reason: check.reason }),
    }
}
