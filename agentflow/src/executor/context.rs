//! Ambient request context: cancellation plus the registry handle every executor borrows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::registry::ToolRegistry;

/// A cooperative cancellation signal. Cloning shares the same underlying flag, matching
/// how a single request's cancellation must reach every worker task spawned for it.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelToken::cancel`] has been called. If already cancelled, resolves
    /// immediately.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Ambient context threaded through every executor call (the "Context (ambient)" glossary entry).
#[derive(Clone)]
pub struct ExecContext {
    pub registry: Arc<ToolRegistry>,
    pub cancel: CancelToken,
}

impl ExecContext {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry, cancel: CancelToken::new() }
    }
}
