//! Cost controller: per-call cost estimation, calendar-period budget enforcement, and
//! tiered alerts, following a daily-counter accounting style with env-configurable limits
//! generalized to a full scope/period model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use super::permission::PermissionContext;

#[derive(Debug, Error, Clone)]
pub enum CostError {
    #[error("budget exceeded for rule {rule}: {reason}")]
    BudgetExceeded { rule: String, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Agent,
    User,
    Session,
    Tool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Period {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Total,
}

/// Derives the calendar-period key used to bucket usage (authoritative over
/// duration-based reset logic).
fn period_key(period: Period, now: DateTime<Utc>) -> String {
    match period {
        Period::Hourly => now.format("%Y-%m-%d-%H").to_string(),
        Period::Daily => now.format("%Y-%m-%d").to_string(),
        Period::Weekly => {
            let iso = now.iso_week();
            format!("{}-W{:02}", iso.year(), iso.week())
        }
        Period::Monthly => now.format("%Y-%m").to_string(),
        Period::Total => "total".to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct Budget {
    pub id: String,
    pub scope: Scope,
    /// Empty means "applies to every id within this scope".
    pub scope_id: String,
    pub limit: f64,
    pub unit: String,
    pub period: Period,
    pub alert_thresholds: Vec<f64>,
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct CostRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    pub tool_name: String,
    pub cost: f64,
    pub unit: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Debug)]
pub struct CostAlert {
    pub budget_id: String,
    pub level: AlertLevel,
    pub percent: f64,
}

#[derive(Debug)]
pub struct BudgetCheckResult {
    pub allowed: bool,
    pub rule: Option<String>,
    pub current: f64,
    pub remaining: f64,
    pub alert: Option<CostAlert>,
    pub reason: String,
}

#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn on_alert(&self, alert: &CostAlert);
}

/// Optional exact token-counter plug-in; absent, `calculate_cost` falls back to `len/4`, a rough stand-in documented here rather than hidden.
pub trait TokenCounter: Send + Sync {
    fn count(&self, arguments: &str) -> u64;
}

#[derive(Clone, Debug)]
pub struct ToolCostConfig {
    pub base: f64,
    pub per_unit: f64,
    pub unit: String,
}

#[derive(Clone, Hash, PartialEq, Eq)]
struct UsageKey {
    scope: ScopeTag,
    scope_id: String,
    budget_id: String,
    period_key: String,
}

#[derive(Clone, Copy, Hash, PartialEq, Eq)]
enum ScopeTag {
    Global,
    Agent,
    User,
    Session,
    Tool,
}

impl From<Scope> for ScopeTag {
    fn from(s: Scope) -> Self {
        match s {
            Scope::Global => ScopeTag::Global,
            Scope::Agent => ScopeTag::Agent,
            Scope::User => ScopeTag::User,
            Scope::Session => ScopeTag::Session,
            Scope::Tool => ScopeTag::Tool,
        }
    }
}

#[derive(Default)]
pub struct CostController {
    tool_costs: RwLock<HashMap<String, ToolCostConfig>>,
    budgets: RwLock<HashMap<String, Budget>>,
    usage: RwLock<HashMap<UsageKey, f64>>,
    journal: RwLock<Vec<CostRecord>>,
    alert_handler: Option<Arc<dyn AlertHandler>>,
    token_counter: Option<Arc<dyn TokenCounter>>,
}

impl CostController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alert_handler(mut self, handler: Arc<dyn AlertHandler>) -> Self {
        self.alert_handler = Some(handler);
        self
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    pub async fn set_tool_cost(&self, tool_name: impl Into<String>, config: ToolCostConfig) {
        self.tool_costs.write().await.insert(tool_name.into(), config);
    }

    pub async fn add_budget(&self, budget: Budget) {
        self.budgets.write().await.insert(budget.id.clone(), budget);
    }

    /// `1.0` for unconfigured tools; otherwise `base + per_unit * units(args, unit)`.
    pub async fn calculate_cost(&self, tool_name: &str, arguments: &str) -> f64 {
        let configs = self.tool_costs.read().await;
        let Some(cfg) = configs.get(tool_name) else {
            return 1.0;
        };
        let units = if cfg.unit == "tokens" {
            match &self.token_counter {
                Some(counter) => counter.count(arguments) as f64,
                None => arguments.len() as f64 / 4.0,
            }
        } else {
            arguments.len() as f64 / 100.0
        };
        cfg.base + cfg.per_unit * units
    }

    fn budget_applies(budget: &Budget, agent_id: &str, user_id: &str, session_id: &str, tool_name: &str) -> bool {
        match budget.scope {
            Scope::Global => true,
            Scope::Agent => budget.scope_id.is_empty() || budget.scope_id == agent_id,
            Scope::User => budget.scope_id.is_empty() || budget.scope_id == user_id,
            Scope::Session => budget.scope_id.is_empty() || budget.scope_id == session_id,
            Scope::Tool => budget.scope_id.is_empty() || budget.scope_id == tool_name,
        }
    }

    fn scope_id_for(budget: &Budget, agent_id: &str, user_id: &str, session_id: &str, tool_name: &str) -> String {
        if !budget.scope_id.is_empty() {
            return budget.scope_id.clone();
        }
        match budget.scope {
            Scope::Global => String::new(),
            Scope::Agent => agent_id.to_string(),
            Scope::User => user_id.to_string(),
            Scope::Session => session_id.to_string(),
            Scope::Tool => tool_name.to_string(),
        }
    }

    /// Checks `cost` against every enabled budget applicable to `ctx`; denies if any budget
    /// would be exceeded, else synthesizes an alert for any threshold crossed.
    pub async fn check_budget(&self, ctx: &PermissionContext, cost: f64) -> BudgetCheckResult {
        let now = ctx.request_at;
        let budgets: Vec<Budget> = self
            .budgets
            .read()
            .await
            .values()
            .filter(|b| b.enabled && Self::budget_applies(b, &ctx.agent_id, &ctx.user_id, &ctx.session_id, &ctx.tool_name))
            .cloned()
            .collect();

        let mut tightest_remaining = f64::INFINITY;
        let mut tightest_current = 0.0;
        let mut alert = None;

        {
            let usage = self.usage.read().await;
            for budget in &budgets {
                let scope_id = Self::scope_id_for(budget, &ctx.agent_id, &ctx.user_id, &ctx.session_id, &ctx.tool_name);
                let key = UsageKey {
                    scope: budget.scope.into(),
                    scope_id,
                    budget_id: budget.id.clone(),
                    period_key: period_key(budget.period, now),
                };
                let current = *usage.get(&key).unwrap_or(&0.0);
                if current + cost > budget.limit {
                    return BudgetCheckResult {
                        allowed: false,
                        rule: Some(budget.id.clone()),
                        current,
                        remaining: (budget.limit - current).max(0.0),
                        alert: None,
                        reason: format!("budget {} would exceed limit {} {}", budget.id, budget.limit, budget.unit),
                    };
                }
                let remaining = budget.limit - (current + cost);
                if remaining < tightest_remaining {
                    tightest_remaining = remaining;
                    tightest_current = current;
                }

                let before_pct = current / budget.limit * 100.0;
                let after_pct = (current + cost) / budget.limit * 100.0;
                for &threshold in &budget.alert_thresholds {
                    if after_pct >= threshold && before_pct < threshold {
                        let level = if after_pct >= 100.0 {
                            AlertLevel::Critical
                        } else if after_pct >= 80.0 {
                            AlertLevel::Warning
                        } else {
                            AlertLevel::Info
                        };
                        alert = Some(CostAlert { budget_id: budget.id.clone(), level, percent: after_pct });
                    }
                }
            }
        }

        if let (Some(handler), Some(a)) = (&self.alert_handler, &alert) {
            handler.on_alert(a).await;
        }

        BudgetCheckResult {
            allowed: true,
            rule: None,
            current: tightest_current,
            remaining: if tightest_remaining.is_finite() { tightest_remaining } else { f64::MAX },
            alert,
            reason: String::new(),
        }
    }

    /// Appends to the journal and increments every applicable budget's usage under the
    /// current period key, pruning stale entries from a prior period (a lazy reset).
    pub async fn record_cost(&self, record: CostRecord) {
        let budgets: Vec<Budget> = self
            .budgets
            .read()
            .await
            .values()
            .filter(|b| b.enabled && Self::budget_applies(b, &record.agent_id, &record.user_id, &record.session_id, &record.tool_name))
            .cloned()
            .collect();

        {
            let mut usage = self.usage.write().await;
            for budget in &budgets {
                let scope_id = Self::scope_id_for(budget, &record.agent_id, &record.user_id, &record.session_id, &record.tool_name);
                let current_period = period_key(budget.period, record.timestamp);
                usage.retain(|k, _| {
                    !(k.scope == budget.scope.into() && k.scope_id == scope_id && k.budget_id == budget.id && k.period_key != current_period)
                });
                let key = UsageKey { scope: budget.scope.into(), scope_id, budget_id: budget.id.clone(), period_key: current_period };
                *usage.entry(key).or_insert(0.0) += record.cost;
            }
        }
        self.journal.write().await.push(record);
    }

    /// Sums every usage entry matching `(scope, scope_id, period)` regardless of budget id —
    /// the "legacy `scope:scopeID::periodKey`" aggregation semantic: prefix/suffix
    /// matching, not literal key equality, so every budget sharing the scope contributes.
    pub async fn get_usage(&self, scope: Scope, scope_id: &str, period: Period, now: DateTime<Utc>) -> f64 {
        let key_period = period_key(period, now);
        let tag: ScopeTag = scope.into();
        self.usage
            .read()
            .await
            .iter()
            .filter(|(k, _)| k.scope == tag && k.scope_id == scope_id && k.period_key == key_period)
            .map(|(_, v)| *v)
            .sum()
    }

    pub async fn get_cost_report(&self, filter: CostReportFilter) -> CostReport {
        let journal = self.journal.read().await;
        let mut per_tool: HashMap<String, (f64, u64)> = HashMap::new();
        let mut total_cost = 0.0;
        for record in journal.iter().filter(|r| filter.matches(r)) {
            let entry = per_tool.entry(record.tool_name.clone()).or_insert((0.0, 0));
            entry.0 += record.cost;
            entry.1 += 1;
            total_cost += record.cost;
        }
        let mut tools: Vec<ToolCostSummary> = per_tool
            .into_iter()
            .map(|(tool_name, (cost, count))| ToolCostSummary {
                tool_name,
                total_cost: cost,
                call_count: count,
                average_cost: if count > 0 { cost / count as f64 } else { 0.0 },
            })
            .collect();
        tools.sort_by(|a, b| b.total_cost.partial_cmp(&a.total_cost).unwrap_or(std::cmp::Ordering::Equal));
        tools.truncate(10);
        CostReport { top_tools: tools, total_cost }
    }
}

#[derive(Clone, Debug, Default)]
pub struct CostReportFilter {
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    pub tool_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl CostReportFilter {
    fn matches(&self, record: &CostRecord) -> bool {
        self.agent_id.as_ref().map_or(true, |v| v == &record.agent_id)
            && self.user_id.as_ref().map_or(true, |v| v == &record.user_id)
            && self.tool_name.as_ref().map_or(true, |v| v == &record.tool_name)
            && self.since.map_or(true, |v| record.timestamp >= v)
            && self.until.map_or(true, |v| record.timestamp <= v)
    }
}

#[derive(Clone, Debug)]
pub struct ToolCostSummary {
    pub tool_name: String,
    pub total_cost: f64,
    pub call_count: u64,
    pub average_cost: f64,
}

#[derive(Clone, Debug)]
pub struct CostReport {
    pub top_tools: Vec<ToolCostSummary>,
    pub total_cost: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(agent: &str, tool: &str) -> PermissionContext {
        PermissionContext::new(agent, tool)
    }

    #[tokio::test]
    async fn unconfigured_tool_costs_one() {
        let controller = CostController::new();
        assert_eq!(controller.calculate_cost("unknown", "{}").await, 1.0);
    }

    #[tokio::test]
    async fn budget_denies_when_cost_would_exceed_limit() {
        let controller = CostController::new();
        controller
            .add_budget(Budget {
                id: "b1".into(),
                scope: Scope::Agent,
                scope_id: "agent-1".into(),
                limit: 5.0,
                unit: "credits".into(),
                period: Period::Daily,
                alert_thresholds: vec![80.0],
                enabled: true,
            })
            .await;
        let c = ctx("agent-1", "search");
        let result = controller.check_budget(&c, 10.0).await;
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn alert_fires_once_threshold_crossed() {
        let controller = CostController::new();
        controller
            .add_budget(Budget {
                id: "b1".into(),
                scope: Scope::Agent,
                scope_id: "agent-1".into(),
                limit: 10.0,
                unit: "credits".into(),
                period: Period::Daily,
                alert_thresholds: vec![80.0],
                enabled: true,
            })
            .await;
        let c = ctx("agent-1", "search");
        controller
            .record_cost(CostRecord {
                id: "r1".into(),
                timestamp: c.request_at,
                agent_id: "agent-1".into(),
                user_id: String::new(),
                session_id: String::new(),
                tool_name: "search".into(),
                cost: 7.0,
                unit: "credits".into(),
            })
            .await;
        let result = controller.check_budget(&c, 1.0).await;
        assert!(result.allowed);
        assert!(result.alert.is_some());
        assert_eq!(result.alert.unwrap().level, AlertLevel::Warning);
    }

    #[tokio::test]
    async fn period_roll_isolates_usage() {
        let controller = CostController::new();
        controller
            .add_budget(Budget {
                id: "b1".into(),
                scope: Scope::Global,
                scope_id: String::new(),
                limit: 100.0,
                unit: "credits".into(),
                period: Period::Daily,
                alert_thresholds: vec![],
                enabled: true,
            })
            .await;
        let day1 = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let day2 = DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc);
        controller
            .record_cost(CostRecord {
                id: "r1".into(),
                timestamp: day1,
                agent_id: "a".into(),
                user_id: "u".into(),
                session_id: "s".into(),
                tool_name: "search".into(),
                cost: 50.0,
                unit: "credits".into(),
            })
            .await;
        assert_eq!(controller.get_usage(Scope::Global, "", Period::Daily, day1).await, 50.0);
        assert_eq!(controller.get_usage(Scope::Global, "", Period::Daily, day2).await, 0.0);
    }
}
