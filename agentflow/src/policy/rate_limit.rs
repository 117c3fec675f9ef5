//! Rate-limit manager: a policy-level middleware that layers named, independently
//! configured [`RateLimiter`] scopes (per-agent, per-tool, global) in front of a call, distinct
//! from the registry's single built-in per-tool limiter (which already covers that case).
//! Follows a per-scope daily-limit struct, generalized to pluggable algorithms via
//! [`crate::limiter`] and to rule matching via the same glob grammar [`PermissionRule`] uses.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::limiter::{build_limiter, LimiterStrategy, RateLimitConfig, RateLimiter};
use crate::policy::permission::glob_match;

/// What happens when a rule's limiter denies a call. `Queue` and `Degrade` are surfaced as
/// distinct failures so a caller can tell them apart from an outright rejection, but neither
/// implements actual queueing or a cached-response fallback — the source this is modeled on
/// doesn't either (see the rate-limit open question in the design notes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RateLimitAction {
    #[default]
    Reject,
    Queue,
    Degrade,
}

/// Which field the rule's limiter key is scoped by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    Tool,
    Agent,
}

#[derive(Clone, Debug)]
pub struct RateLimitRule {
    pub id: String,
    pub scope: RateLimitScope,
    /// Glob pattern over the tool name; `"*"` matches every tool. Only consulted for
    /// `Scope::Tool`-scoped rules (global/agent rules apply regardless of tool).
    pub tool_pattern: String,
    pub strategy: LimiterStrategy,
    pub config: RateLimitConfig,
    pub action: RateLimitAction,
}

#[derive(Debug, Error, Clone)]
pub enum RateLimitError {
    #[error("rate limit exceeded for rule {rule_id} (scope {scope}): retry after {retry_after:?}")]
    Rejected { rule_id: String, scope: String, retry_after: Duration },
    #[error("rate limit exceeded for rule {rule_id} (scope {scope}): call queued, retry after {retry_after:?}")]
    Queued { rule_id: String, scope: String, retry_after: Duration },
    #[error("rate limit exceeded for rule {rule_id} (scope {scope}): degraded response required")]
    Degraded { rule_id: String, scope: String },
}

/// One independently-tracked rate-limit scope: e.g. `"agent:rule-id:agent-1"`,
/// `"tool:rule-id:search"`, `"global:rule-id"`. A request may be checked against several rules;
/// any denial denies the call.
pub struct RateLimitManager {
    rules: RwLock<Vec<RateLimitRule>>,
    limiters: RwLock<HashMap<String, Box<dyn RateLimiter>>>,
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self { rules: RwLock::new(Vec::new()), limiters: RwLock::new(HashMap::new()) }
    }
}

impl RateLimitManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_rule(&self, rule: RateLimitRule) {
        self.rules.write().await.push(rule);
    }

    /// Legacy convenience: registers a single reject-on-deny, token-bucket rule scoped to
    /// `scope_key` (kept for callers that configured ad-hoc scopes directly rather than
    /// through rules). Both `check(scope_key)` and `check_all` observe the same limiter,
    /// since both derive the key as `global:legacy:{scope_key}`.
    pub async fn configure_scope(&self, scope_key: impl Into<String>, config: RateLimitConfig) {
        let scope_key = scope_key.into();
        self.rules.write().await.push(RateLimitRule {
            id: format!("legacy:{scope_key}"),
            scope: RateLimitScope::Global,
            tool_pattern: "*".into(),
            strategy: LimiterStrategy::TokenBucket,
            config,
            action: RateLimitAction::Reject,
        });
    }

    fn legacy_key(scope_key: &str) -> String {
        format!("global:legacy:{scope_key}")
    }

    fn limiter_key(rule: &RateLimitRule, tool_name: &str, agent_id: &str) -> String {
        match rule.scope {
            RateLimitScope::Global => format!("global:{}", rule.id),
            RateLimitScope::Tool => format!("tool:{}:{}", rule.id, tool_name),
            RateLimitScope::Agent => format!("agent:{}:{}", rule.id, agent_id),
        }
    }

    async fn ensure_limiter(&self, rule: &RateLimitRule, key: &str) {
        if self.limiters.read().await.contains_key(key) {
            return;
        }
        let mut limiters = self.limiters.write().await;
        limiters.entry(key.to_string()).or_insert_with(|| build_limiter(rule.strategy, rule.config));
    }

    /// Evaluates every rule applicable to `tool_name`/`agent_id`, denying on the first rule
    /// whose limiter rejects the call. Tool-scoped rules only apply when `tool_pattern` matches.
    pub async fn check_all(&self, agent_id: &str, tool_name: &str) -> Result<(), RateLimitError> {
        let rules = self.rules.read().await.clone();
        for rule in &rules {
            if rule.scope == RateLimitScope::Tool && !glob_match(&rule.tool_pattern, tool_name) {
                continue;
            }
            let key = Self::limiter_key(rule, tool_name, agent_id);
            self.ensure_limiter(rule, &key).await;
            let limiters = self.limiters.read().await;
            let limiter = limiters.get(&key).expect("just inserted");
            let now = Instant::now();
            if !limiter.allow_at(now) {
                let retry_after = limiter.reset_at().saturating_duration_since(now);
                let scope = key.clone();
                return Err(match rule.action {
                    RateLimitAction::Reject => RateLimitError::Rejected { rule_id: rule.id.clone(), scope, retry_after },
                    RateLimitAction::Queue => RateLimitError::Queued { rule_id: rule.id.clone(), scope, retry_after },
                    RateLimitAction::Degrade => RateLimitError::Degraded { rule_id: rule.id.clone(), scope },
                });
            }
        }
        Ok(())
    }

    /// Checks a single ad-hoc scope key directly (bypassing full rule matching); used by
    /// callers that configured via [`Self::configure_scope`].
    pub async fn check(&self, scope_key: &str) -> Result<(), RateLimitError> {
        let rule_id = format!("legacy:{scope_key}");
        let rules = self.rules.read().await.clone();
        let Some(rule) = rules.iter().find(|r| r.id == rule_id) else {
            return Ok(());
        };
        let key = Self::legacy_key(scope_key);
        self.ensure_limiter(rule, &key).await;
        let limiters = self.limiters.read().await;
        let limiter = limiters.get(&key).expect("just inserted");
        let now = Instant::now();
        if limiter.allow_at(now) {
            Ok(())
        } else {
            let retry_after = limiter.reset_at().saturating_duration_since(now);
            Err(RateLimitError::Rejected { rule_id, scope: key, retry_after })
        }
    }

    pub async fn remaining(&self, scope_key: &str) -> Option<i64> {
        self.limiters.read().await.get(&Self::legacy_key(scope_key)).map(|l| l.remaining())
    }

    pub async fn reset(&self, scope_key: &str) {
        if let Some(limiter) = self.limiters.read().await.get(&Self::legacy_key(scope_key)) {
            limiter.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_scope_always_allows() {
        let manager = RateLimitManager::new();
        assert!(manager.check_all("agent-1", "search").await.is_ok());
    }

    #[tokio::test]
    async fn configured_scope_denies_past_limit() {
        let manager = RateLimitManager::new();
        manager.configure_scope("global:tool:search", RateLimitConfig { max_calls: 1, window: Duration::from_secs(60) }).await;
        assert!(manager.check("global:tool:search").await.is_ok());
        let err = manager.check("global:tool:search").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Rejected { .. }));
    }

    #[tokio::test]
    async fn tool_scoped_rule_only_applies_to_matching_tools() {
        let manager = RateLimitManager::new();
        manager
            .add_rule(RateLimitRule {
                id: "search-limit".into(),
                scope: RateLimitScope::Tool,
                tool_pattern: "search*".into(),
                strategy: LimiterStrategy::TokenBucket,
                config: RateLimitConfig { max_calls: 1, window: Duration::from_secs(60) },
                action: RateLimitAction::Reject,
            })
            .await;
        assert!(manager.check_all("agent-1", "search_web").await.is_ok());
        assert!(manager.check_all("agent-1", "search_web").await.is_err());
        // A different tool name is untouched by the `search*` rule.
        assert!(manager.check_all("agent-1", "translate").await.is_ok());
    }

    #[tokio::test]
    async fn queue_and_degrade_actions_surface_distinct_errors() {
        let manager = RateLimitManager::new();
        manager
            .add_rule(RateLimitRule {
                id: "queue-rule".into(),
                scope: RateLimitScope::Global,
                tool_pattern: "*".into(),
                strategy: LimiterStrategy::TokenBucket,
                config: RateLimitConfig { max_calls: 1, window: Duration::from_secs(60) },
                action: RateLimitAction::Queue,
            })
            .await;
        assert!(manager.check_all("agent-1", "search").await.is_ok());
        let err = manager.check_all("agent-1", "search").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Queued { .. }));
    }

    #[tokio::test]
    async fn agent_scoped_rule_isolates_by_agent() {
        let manager = RateLimitManager::new();
        manager
            .add_rule(RateLimitRule {
                id: "per-agent".into(),
                scope: RateLimitScope::Agent,
                tool_pattern: "*".into(),
                strategy: LimiterStrategy::TokenBucket,
                config: RateLimitConfig { max_calls: 1, window: Duration::from_secs(60) },
                action: RateLimitAction::Reject,
            })
            .await;
        assert!(manager.check_all("agent-1", "search").await.is_ok());
        assert!(manager.check_all("agent-1", "search").await.is_err());
        // A different agent has its own bucket under the same rule.
        assert!(manager.check_all("agent-2", "search").await.is_ok());
    }
}
