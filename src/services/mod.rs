//! Cross-cutting services for remote calls

pub mod metrics;
pub mod retry;

pub use metrics::{Metrics, MetricsSnapshot};
pub use retry::{with_retry, RetryConfig};
