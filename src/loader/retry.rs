//! Fixed-delay retry loop for remote fetches
//!
//! `max_retries` is the total attempt budget; each attempt consumes one
//! unit. The delay between attempts is fixed, not exponential. Whether a
//! failure is worth retrying is decided by an injectable classifier so
//! callers can tighten or loosen the default policy.

use crate::config::schema::RetryConfig;
use crate::error::{DepotError, DepotResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Decides whether a failure is retryable
pub type RetryClassifier = Arc<dyn Fn(&DepotError) -> bool + Send + Sync>;

/// Default classifier: defer to [`DepotError::is_retryable`]
pub fn default_classifier() -> RetryClassifier {
    Arc::new(DepotError::is_retryable)
}

/// Run `op` up to `policy.max_retries` times, sleeping the fixed delay
/// between attempts. Non-retryable failures return immediately; an
/// exhausted budget returns [`DepotError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    classifier: &RetryClassifier,
    mut op: F,
) -> DepotResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = DepotResult<T>>,
{
    let budget = policy.max_retries.max(1);
    let delay = Duration::from_secs_f64(policy.delay_seconds.max(0.0));

    for attempt in 1..=budget {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < budget && classifier(&err) => {
                warn!(attempt, error = %err, "fetch attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if attempt == budget && classifier(&err) {
                    return Err(DepotError::RetriesExhausted {
                        attempts: budget,
                        last: err.to_string(),
                    });
                }
                return Err(err);
            }
        }
    }
    unreachable!("retry budget loop always returns")
}
