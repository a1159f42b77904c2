//! Retry Logic with Fixed Delay
//!
//! Every Racer API call gets its own attempt counter. Failed attempts wait a
//! constant delay on the injected clock; the final error is handed back
//! untouched.

use crate::clock::Clock;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_millis(1000),
        }
    }
}

/// Execute an async closure, retrying any error up to `config.attempts` times.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    clock: &dyn Clock,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = config.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if attempt >= attempts {
                    if attempts > 1 {
                        warn!(
                            "[Retry] {} failed after {} attempts: {}",
                            operation_name, attempt, err
                        );
                    }
                    return Err(err);
                }

                debug!(
                    "[Retry] {} attempt {}/{} failed ({}), retrying in {}ms",
                    operation_name,
                    attempt,
                    attempts,
                    err,
                    config.delay.as_millis()
                );

                clock.sleep(config.delay).await;
            }
        }
    }
}
