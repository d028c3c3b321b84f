/// Single-writer progress record shared between the collector and the HTTP
/// adapter. Readers accept a slightly stale snapshot rather than lock.
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::Progress;

#[derive(Clone)]
pub struct ProgressHandle {
    inner: Arc<RwLock<Option<Progress>>>,
}

impl ProgressHandle {
    pub fn new() -> Self {
        ProgressHandle {
            inner: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn start(&self, operation: &str, total: usize) {
        *self.inner.write().await = Some(Progress::new(operation, total));
    }

    pub async fn advance(&self, current_stock: Option<String>) {
        if let Some(p) = self.inner.write().await.as_mut() {
            p.current += 1;
            p.current_stock = current_stock;
        }
    }

    pub async fn record_failure(&self, message: String) {
        if let Some(p) = self.inner.write().await.as_mut() {
            p.failures.push(message);
        }
    }

    pub async fn finish(&self) {
        if let Some(p) = self.inner.write().await.as_mut() {
            p.finished_at = Some(chrono::Utc::now());
        }
    }

    pub async fn snapshot(&self) -> Option<Progress> {
        self.inner.read().await.clone()
    }
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new()
    }
}
