//! Tool registry: name → `{function, schema, timeout, rate-limit}`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::limiter::{LimiterStrategy, RateLimitConfig, RateLimiter, TokenBucketLimiter};
use crate::tool::ToolSchema;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    AlreadyRegistered(String),
    #[error("tool schema name {schema_name} does not match registration name {name}")]
    SchemaNameMismatch { name: String, schema_name: String },
    #[error("tool not found: {0}")]
    NotFound(String),
}

/// A registered tool's callable body. Takes the raw JSON argument text, returns raw JSON
/// result text or a human-readable error string — the executor is what applies timeouts,
/// retries, and rate limiting around this call.
#[async_trait]
pub trait ToolFn: Send + Sync {
    async fn call(&self, arguments: &str) -> Result<String, String>;
}

#[async_trait]
impl<F, Fut> ToolFn for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<String, String>> + Send,
{
    async fn call(&self, arguments: &str) -> Result<String, String> {
        (self)(arguments.to_string()).await
    }
}

/// Declared metadata for a registered tool (mirrors the `Tool` entity).
#[derive(Clone, Debug)]
pub struct ToolMeta {
    pub schema: ToolSchema,
    pub timeout: Duration,
    pub rate_limit: Option<RateLimitConfig>,
}

impl ToolMeta {
    pub fn new(schema: ToolSchema) -> Self {
        Self { schema, timeout: DEFAULT_TOOL_TIMEOUT, rate_limit: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { DEFAULT_TOOL_TIMEOUT } else { timeout };
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }
}

struct Entry {
    func: Arc<dyn ToolFn>,
    meta: ToolMeta,
    limiter: Option<Arc<dyn RateLimiter>>,
}

/// In-memory associative store of registered tools. Concurrency-safe: reads take a
/// shared lock, `register`/`unregister` take an exclusive one; no I/O happens under either.
#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name → fn` with `meta`. Fails if `name` already exists, or if
    /// `meta.schema.name` is non-empty and differs from `name`. Defaults `timeout` to
    /// [`DEFAULT_TOOL_TIMEOUT`] if zero, and creates a token-bucket limiter when
    /// `meta.rate_limit` is present.
    pub fn register(
        &self,
        name: impl Into<String>,
        func: Arc<dyn ToolFn>,
        mut meta: ToolMeta,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if !meta.schema.name.is_empty() && meta.schema.name != name {
            return Err(RegistryError::SchemaNameMismatch { name, schema_name: meta.schema.name });
        }
        if meta.timeout.is_zero() {
            meta.timeout = DEFAULT_TOOL_TIMEOUT;
        }
        meta.schema.name = name.clone();

        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        let limiter: Option<Arc<dyn RateLimiter>> = meta.rate_limit.map(|cfg| {
            Arc::new(TokenBucketLimiter::new(cfg.max_calls, cfg.window)) as Arc<dyn RateLimiter>
        });
        entries.insert(name.clone(), Entry { func, meta, limiter });
        tracing::info!(tool = %name, "registered tool");
        Ok(())
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<(Arc<dyn ToolFn>, ToolMeta), RegistryError> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        Ok((Arc::clone(&entry.func), entry.meta.clone()))
    }

    /// Snapshot of all registered tool schemas, for exposing to the LLM.
    pub fn list(&self) -> Vec<ToolSchema> {
        self.entries.read().unwrap().values().map(|e| e.meta.schema.clone()).collect()
    }

    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(name).map(|_| ()).ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Consults the per-tool limiter, if any; `true` when no limiter is configured.
    pub fn check_rate_limit(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap();
        match entries.get(name) {
            Some(entry) => entry.limiter.as_ref().map(|l| l.allow()).unwrap_or(true),
            None => true,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn strategy_hint(&self) -> LimiterStrategy {
        LimiterStrategy::TokenBucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(name: &str) -> ToolSchema {
        ToolSchema { name: name.to_string(), description: String::new(), parameters: json!({}) }
    }

    fn echo_fn() -> Arc<dyn ToolFn> {
        Arc::new(|args: String| async move { Ok(args) })
    }

    #[test]
    fn register_and_get_roundtrip() {
        let registry = ToolRegistry::new();
        registry.register("echo", echo_fn(), ToolMeta::new(schema("echo"))).unwrap();
        assert!(registry.has("echo"));
        let (_, meta) = registry.get("echo").unwrap();
        assert_eq!(meta.timeout, DEFAULT_TOOL_TIMEOUT);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ToolRegistry::new();
        registry.register("echo", echo_fn(), ToolMeta::new(schema("echo"))).unwrap();
        let err = registry.register("echo", echo_fn(), ToolMeta::new(schema("echo"))).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn schema_name_mismatch_fails() {
        let registry = ToolRegistry::new();
        let err = registry.register("echo", echo_fn(), ToolMeta::new(schema("other"))).unwrap_err();
        assert!(matches!(err, RegistryError::SchemaNameMismatch { .. }));
    }

    #[test]
    fn unregister_removes_tool_and_limiter_atomically() {
        let registry = ToolRegistry::new();
        registry
            .register(
                "limited",
                echo_fn(),
                ToolMeta::new(schema("limited"))
                    .with_rate_limit(RateLimitConfig { max_calls: 1, window: Duration::from_secs(1) }),
            )
            .unwrap();
        registry.unregister("limited").unwrap();
        assert!(!registry.has("limited"));
        assert!(registry.get("limited").is_err());
    }

    #[test]
    fn get_unknown_tool_fails() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(_))));
    }
}
