//! Runtime configuration surface: environment-driven knobs for the
//! executor, parallel batch runner, and ReAct driver.
//!
//! Built on `agentflow-config`'s `load_and_apply` (XDG config + `.env` + process environment,
//! later sources winning) with tolerant env parsing: an unset or unparsable variable falls
//! back to its documented default with a `tracing::warn!`, never a hard error.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// AgentFlow's environment-driven configuration. Every field has a documented default so
/// a caller can always construct one even with no environment configured.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: f64,
    pub max_concurrency: usize,
    pub execution_timeout_secs: u64,
    pub fail_fast: bool,
    pub default_tool_timeout_secs: u64,
    pub react_max_iterations: u32,
    pub react_stop_on_error: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 100,
            retry_backoff: 2.0,
            max_concurrency: 10,
            execution_timeout_secs: 60,
            fail_fast: false,
            default_tool_timeout_secs: 30,
            react_max_iterations: 10,
            react_stop_on_error: false,
        }
    }
}

impl RuntimeConfig {
    /// Loads XDG config + `.env` into the process environment (via `agentflow-config`), then
    /// parses the AgentFlow-specific variables on top of it. Loading failures (missing XDG
    /// config, unreadable `.env`) are non-fatal: they're logged and the process environment
    /// alone is used.
    pub fn load(app_name: &str) -> Self {
        if let Err(err) = agentflow_config::load_and_apply(app_name, None) {
            tracing::warn!(error = %err, "failed to load ambient configuration, falling back to process environment");
        }
        Self::from_env()
    }

    /// Parses every field from its environment variable, substituting the documented default
    /// and emitting a `tracing::warn!` whenever a variable is set but fails to parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: parsed_env("AGENTFLOW_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: parsed_env("AGENTFLOW_RETRY_DELAY_MS", defaults.retry_delay_ms),
            retry_backoff: parsed_env("AGENTFLOW_RETRY_BACKOFF", defaults.retry_backoff),
            max_concurrency: parsed_env("AGENTFLOW_MAX_CONCURRENCY", defaults.max_concurrency),
            execution_timeout_secs: parsed_env("AGENTFLOW_EXECUTION_TIMEOUT_SECS", defaults.execution_timeout_secs),
            fail_fast: parsed_env("AGENTFLOW_FAIL_FAST", defaults.fail_fast),
            default_tool_timeout_secs: parsed_env("AGENTFLOW_DEFAULT_TOOL_TIMEOUT_SECS", defaults.default_tool_timeout_secs),
            react_max_iterations: parsed_env("AGENTFLOW_REACT_MAX_ITERATIONS", defaults.react_max_iterations),
            react_stop_on_error: parsed_env("AGENTFLOW_REACT_STOP_ON_ERROR", defaults.react_stop_on_error),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    pub fn default_tool_timeout(&self) -> Duration {
        Duration::from_secs(self.default_tool_timeout_secs)
    }
}

fn parsed_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, value = %raw, error = %err, "failed to parse config variable, using default");
                default
            }
        },
        Err(_) => default,
    }
}
