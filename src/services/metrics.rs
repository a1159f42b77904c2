//! Remote call counters for diagnostics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests issued, counting every retry attempt
    pub api_calls_total: u64,
    /// Attempts that failed (transport, status or decode)
    pub api_errors_total: u64,
    /// Attempts after the first one of a call
    pub retries_total: u64,
}

/// Thread-safe metrics collector
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    api_calls_total: AtomicU64,
    api_errors_total: AtomicU64,
    retries_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_api_calls(&self) {
        self.inner.api_calls_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_api_errors(&self) {
        self.inner.api_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retries(&self) {
        self.inner.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            api_calls_total: self.inner.api_calls_total.load(Ordering::Relaxed),
            api_errors_total: self.inner.api_errors_total.load(Ordering::Relaxed),
            retries_total: self.inner.retries_total.load(Ordering::Relaxed),
        }
    }
}
