//! Audit logger: asynchronous fan-out of structured decision/execution records to one
//! or more pluggable sinks. The `AuditEntry` shape (id/provider-action-resource/decision/
//! timestamp) and the day- and size-based file-rotation strategy follow conventions common to
//! policy audit trails and checkpoint persistence, adapted to AgentFlow's agent/tool vocabulary
//! and sink/queue contract.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error, Clone)]
pub enum AuditError {
    #[error("audit sink {sink} failed: {reason}")]
    SinkFailed { sink: String, reason: String },
    #[error("audit logger is closed")]
    Closed,
}

/// Structured record kind. `CostCheck` is an AgentFlow-local addition covering the
/// pass/deny decision itself, distinct from `CostAlert`'s tiered-threshold notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    ToolCall,
    ToolResult,
    PermissionCheck,
    RateLimitHit,
    CostAlert,
    CostCheck,
}

#[derive(Clone, Debug)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub user_id: String,
    pub session_id: String,
    pub trace_id: String,
    pub tool_name: String,
    pub action: AuditAction,
    pub arguments: String,
    pub result: String,
    pub error: String,
    pub duration: Option<std::time::Duration>,
    pub decision: String,
    pub cost: Option<f64>,
    pub metadata: HashMap<String, String>,
    pub request_ip: Option<String>,
    /// Free-text detail, kept for backward compatibility with callers that just want one
    /// human-readable reason rather than filling out every typed field.
    pub details: String,
}

impl AuditEntry {
    pub fn new(agent_id: impl Into<String>, tool_name: impl Into<String>, action: AuditAction, decision: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            agent_id: agent_id.into(),
            user_id: String::new(),
            session_id: String::new(),
            trace_id: String::new(),
            tool_name: tool_name.into(),
            action,
            arguments: String::new(),
            result: String::new(),
            error: String::new(),
            duration: None,
            decision: decision.into(),
            cost: None,
            metadata: HashMap::new(),
            request_ip: None,
            details: String::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Fills `id`/`timestamp` if a caller constructed an entry by hand and left them at their
    /// zero value (`log_async` fills them if absent).
    fn fill_defaults(mut self) -> Self {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;
    async fn write(&self, entry: &AuditEntry) -> Result<(), String>;
    /// Best-effort flush/close; sinks with no durable resource are a no-op.
    async fn close(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Mirrors entries into `tracing` at `info` level — the default sink when no durable backend
/// is configured (audit storage backends are out of scope, but a log trail is not).
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn write(&self, entry: &AuditEntry) -> Result<(), String> {
        tracing::info!(
            target: "agentflow::audit",
            id = %entry.id,
            agent_id = %entry.agent_id,
            tool_name = %entry.tool_name,
            action = ?entry.action,
            decision = %entry.decision,
            "audit entry"
        );
        Ok(())
    }
}

/// In-memory ring buffer sink. When full, drops the oldest 10% to make room rather than the
/// single oldest entry, matching memory-sink description.
pub struct InMemorySink {
    capacity: usize,
    entries: RwLock<VecDeque<AuditEntry>>,
}

impl InMemorySink {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: RwLock::new(VecDeque::with_capacity(capacity)) }
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl AuditSink for InMemorySink {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn write(&self, entry: &AuditEntry) -> Result<(), String> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            let drop_count = (self.capacity / 10).max(1);
            for _ in 0..drop_count {
                if entries.pop_front().is_none() {
                    break;
                }
            }
        }
        entries.push_back(entry.clone());
        Ok(())
    }
}

/// Append-only JSON-lines file sink, one file per calendar day, additionally rotated when the
/// current file exceeds `max_bytes`. Filename: `audit_YYYY-MM-DD_<nanos>.jsonl`, matching
/// on-disk shape (write/rotate only — queries route to a memory or database sink,
/// deliberately).
pub struct FileAuditSink {
    dir: PathBuf,
    max_bytes: u64,
    state: Mutex<FileState>,
}

struct FileState {
    path: Option<PathBuf>,
    day: Option<chrono::NaiveDate>,
    bytes_written: u64,
}

impl FileAuditSink {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { dir: dir.into(), max_bytes, state: Mutex::new(FileState { path: None, day: None, bytes_written: 0 }) }
    }

    async fn current_path(&self, state: &mut FileState, now: DateTime<Utc>, line_len: u64) -> Result<PathBuf, String> {
        let today = now.date_naive();
        let needs_rotation = state.day != Some(today)
            || state.path.is_none()
            || state.bytes_written + line_len > self.max_bytes;
        if needs_rotation {
            tokio::fs::create_dir_all(&self.dir).await.map_err(|e| e.to_string())?;
            let filename = format!("audit_{}_{}.jsonl", now.format("%Y-%m-%d"), now.timestamp_nanos_opt().unwrap_or_default());
            let path = self.dir.join(filename);
            state.path = Some(path.clone());
            state.day = Some(today);
            state.bytes_written = 0;
        }
        Ok(state.path.clone().expect("path set above"))
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, entry: &AuditEntry) -> Result<(), String> {
        use tokio::io::AsyncWriteExt;
        let line = serde_json::to_string(&AuditEntryWire::from(entry)).map_err(|e| e.to_string())?;
        let line_len = line.len() as u64 + 1;
        let mut state = self.state.lock().await;
        let path = self.current_path(&mut state, entry.timestamp, line_len).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| e.to_string())?;
        file.write_all(line.as_bytes()).await.map_err(|e| e.to_string())?;
        file.write_all(b"\n").await.map_err(|e| e.to_string())?;
        state.bytes_written += line_len;
        Ok(())
    }
}

/// Interface-only database sink: concrete storage engines are out of scope, but the
/// seam (including a `migrate` step) is part of the stable contract.
#[async_trait]
pub trait DatabaseAuditSink: AuditSink {
    async fn migrate(&self) -> Result<(), String>;
}

/// Wire shape for the file sink's one-JSON-object-per-line records.
#[derive(serde::Serialize)]
struct AuditEntryWire<'a> {
    id: &'a str,
    timestamp: DateTime<Utc>,
    event_type: &'static str,
    agent_id: &'a str,
    user_id: &'a str,
    session_id: &'a str,
    trace_id: &'a str,
    tool_name: &'a str,
    arguments: &'a str,
    result: &'a str,
    error: &'a str,
    duration: Option<i64>,
    decision: &'a str,
    cost: Option<f64>,
    metadata: &'a HashMap<String, String>,
    request_ip: Option<&'a str>,
}

impl<'a> From<&'a AuditEntry> for AuditEntryWire<'a> {
    fn from(e: &'a AuditEntry) -> Self {
        Self {
            id: &e.id,
            timestamp: e.timestamp,
            event_type: match e.action {
                AuditAction::ToolCall => "tool_call",
                AuditAction::ToolResult => "tool_result",
                AuditAction::PermissionCheck => "permission_check",
                AuditAction::RateLimitHit => "rate_limit_hit",
                AuditAction::CostAlert => "cost_alert",
                AuditAction::CostCheck => "cost_check",
            },
            agent_id: &e.agent_id,
            user_id: &e.user_id,
            session_id: &e.session_id,
            trace_id: &e.trace_id,
            tool_name: &e.tool_name,
            arguments: &e.arguments,
            result: &e.result,
            error: &e.error,
            duration: e.duration.map(|d| d.as_nanos() as i64),
            decision: &e.decision,
            cost: e.cost,
            metadata: &e.metadata,
            request_ip: e.request_ip.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    pub agent_id: Option<String>,
    pub tool_name: Option<String>,
    pub action: Option<AuditAction>,
    pub since: Option<DateTime<Utc>>,
}

impl AuditQuery {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.agent_id.as_ref().map_or(true, |v| v == &entry.agent_id)
            && self.tool_name.as_ref().map_or(true, |v| v == &entry.tool_name)
            && self.action.map_or(true, |v| v == entry.action)
            && self.since.map_or(true, |v| entry.timestamp >= v)
    }
}

const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_WORKERS: usize = 2;

/// Fans one audit entry out to every registered sink, synchronously (`log`) or via a bounded
/// async queue drained by a worker pool (`log_async`).
pub struct AuditLogger {
    sinks: Arc<Vec<Arc<dyn AuditSink>>>,
    queryable: Vec<Arc<InMemorySink>>,
    queue_tx: Mutex<Option<mpsc::Sender<AuditEntry>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS)
    }
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a logger with the default `tracing` sink and a bounded async queue of the given
    /// `capacity`, drained by `worker_count` tasks.
    pub fn with_capacity(capacity: usize, worker_count: usize) -> Self {
        let sinks: Arc<Vec<Arc<dyn AuditSink>>> = Arc::new(vec![Arc::new(TracingAuditSink)]);
        let (queue_tx, workers) = Self::spawn_workers(Arc::clone(&sinks), capacity, worker_count);
        Self { sinks, queryable: Vec::new(), queue_tx: Mutex::new(Some(queue_tx)), workers: Mutex::new(workers), closed: AtomicBool::new(false) }
    }

    fn spawn_workers(
        sinks: Arc<Vec<Arc<dyn AuditSink>>>,
        capacity: usize,
        worker_count: usize,
    ) -> (mpsc::Sender<AuditEntry>, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<AuditEntry>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(worker_count.max(1));
        for _ in 0..worker_count.max(1) {
            let rx = Arc::clone(&rx);
            let sinks = Arc::clone(&sinks);
            handles.push(tokio::spawn(async move {
                loop {
                    let entry = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match entry {
                        Some(entry) => {
                            for sink in sinks.iter() {
                                if let Err(reason) = sink.write(&entry).await {
                                    warn!(sink = sink.name(), %reason, "audit sink write failed");
                                }
                            }
                        }
                        None => break,
                    }
                }
            }));
        }
        (tx, handles)
    }

    /// Rebuilds the logger with an additional sink. Because sinks are referenced by the spawned
    /// worker pool, adding a sink after construction restarts the queue — safe here since this
    /// is only called during setup, before any entry has been logged.
    pub fn with_sink(self, sink: Arc<dyn AuditSink>) -> Self {
        let mut sinks = (*self.sinks).clone();
        sinks.push(sink);
        self.rebuild(sinks, self.queryable)
    }

    /// Registers a sink that is both written to and queryable via [`AuditLogger::query`].
    pub fn with_memory_sink(self, sink: Arc<InMemorySink>) -> Self {
        let mut sinks = (*self.sinks).clone();
        sinks.push(sink.clone());
        let mut queryable = self.queryable;
        queryable.push(sink);
        self.rebuild(sinks, queryable)
    }

    fn rebuild(self, sinks: Vec<Arc<dyn AuditSink>>, queryable: Vec<Arc<InMemorySink>>) -> Self {
        let sinks = Arc::new(sinks);
        let (queue_tx, workers) = Self::spawn_workers(Arc::clone(&sinks), DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS);
        Self { sinks, queryable, queue_tx: Mutex::new(Some(queue_tx)), workers: Mutex::new(workers), closed: AtomicBool::new(false) }
    }

    /// Synchronous fan-out to every sink; fails closed once [`AuditLogger::close`] has run.
    pub async fn log(&self, entry: AuditEntry) -> Result<(), AuditError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AuditError::Closed);
        }
        let entry = entry.fill_defaults();
        let mut first_err = None;
        for sink in self.sinks.iter() {
            if let Err(reason) = sink.write(&entry).await {
                warn!(sink = sink.name(), %reason, "audit sink write failed");
                if first_err.is_none() {
                    first_err = Some(AuditError::SinkFailed { sink: sink.name().to_string(), reason });
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Enqueues `entry` on the bounded async queue; a worker pool drains it to every sink.
    /// Overflow (queue full, or logger closed) drops the record with a `tracing::warn!` rather
    /// than blocking the caller (the queue's backpressure policy favors dropping over blocking).
    pub async fn log_async(&self, entry: AuditEntry) {
        let entry = entry.fill_defaults();
        if self.closed.load(Ordering::SeqCst) {
            warn!(id = %entry.id, "audit entry dropped: logger closed");
            return;
        }
        let guard = self.queue_tx.lock().await;
        match guard.as_ref() {
            Some(tx) => {
                if tx.try_send(entry).is_err() {
                    warn!("audit queue full; dropping record");
                }
            }
            None => warn!("audit queue not initialized; dropping record"),
        }
    }

    /// Queries every [`InMemorySink`] registered via [`AuditLogger::with_memory_sink`], the
    /// only sink kind required to support querying.
    pub async fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let mut out = Vec::new();
        for sink in &self.queryable {
            out.extend(sink.entries().await.into_iter().filter(|e| query.matches(e)));
        }
        out
    }

    /// Flushes the queue, joins the worker pool, and closes every sink. Idempotent: a second
    /// call observes `closed` already set and returns immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Taking (not cloning) the sender drops its last handle, letting workers drain the
        // channel to empty and exit their `recv().await` loop.
        self.queue_tx.lock().await.take();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        for sink in self.sinks.iter() {
            let _ = sink.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logs_to_in_memory_sink_and_queries_back() {
        let sink = Arc::new(InMemorySink::new(10));
        let logger = AuditLogger::new().with_memory_sink(sink);
        logger
            .log(AuditEntry::new("agent-1", "search", AuditAction::ToolCall, "allow"))
            .await
            .unwrap();
        let results = logger.query(&AuditQuery { agent_id: Some("agent-1".into()), ..Default::default() }).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tool_name, "search");
    }

    #[tokio::test]
    async fn ring_buffer_drops_oldest_tenth_past_capacity() {
        let sink = InMemorySink::new(10);
        for i in 0..11 {
            sink.write(&AuditEntry::new("agent-1", format!("tool{i}"), AuditAction::ToolCall, "allow")).await.unwrap();
        }
        let entries = sink.entries().await;
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].tool_name, "tool1");
    }

    #[tokio::test]
    async fn log_async_entries_are_eventually_queryable() {
        let sink = Arc::new(InMemorySink::new(10));
        let logger = AuditLogger::new().with_memory_sink(sink);
        logger.log_async(AuditEntry::new("agent-1", "search", AuditAction::ToolCall, "allow")).await;
        logger.close().await;
        let results = logger.query(&AuditQuery::default()).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_fails_log_closed() {
        let logger = AuditLogger::new();
        logger.close().await;
        logger.close().await;
        let err = logger.log(AuditEntry::new("agent-1", "search", AuditAction::ToolCall, "allow")).await.unwrap_err();
        assert!(matches!(err, AuditError::Closed));
    }

    #[tokio::test]
    async fn file_sink_writes_one_json_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path(), 1024 * 1024);
        sink.write(&AuditEntry::new("agent-1", "search", AuditAction::ToolCall, "allow")).await.unwrap();
        sink.write(&AuditEntry::new("agent-1", "search", AuditAction::ToolResult, "ok")).await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut file_path = None;
        while let Some(entry) = entries.next_entry().await.unwrap() {
            file_path = Some(entry.path());
        }
        let contents = tokio::fs::read_to_string(file_path.unwrap()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "tool_call");
        assert_eq!(first["tool_name"], "search");
    }

    #[tokio::test]
    async fn file_sink_rotates_past_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path(), 10);
        sink.write(&AuditEntry::new("agent-1", "search", AuditAction::ToolCall, "allow")).await.unwrap();
        sink.write(&AuditEntry::new("agent-1", "other", AuditAction::ToolCall, "allow")).await.unwrap();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
