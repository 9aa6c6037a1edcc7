//! Bounded retry for transient storage failures

use crate::config::StorageConfig;
use crate::errors::{CoreError, Result};
use backoff::{future::retry, ExponentialBackoff};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run a storage operation with bounded exponential backoff.
///
/// Only `StorageUnavailable` is treated as transient; every other error
/// aborts immediately. When the retries are exhausted the last
/// `StorageUnavailable` is returned and the caller commits nothing.
pub async fn with_retry<T, F, Fut>(policy: &StorageConfig, label: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(policy.initial_backoff_ms),
        max_interval: Duration::from_millis(policy.max_backoff_ms),
        max_elapsed_time: Some(Duration::from_millis(
            policy.initial_backoff_ms + policy.max_backoff_ms * u64::from(policy.max_retries),
        )),
        ..ExponentialBackoff::default()
    };

    retry(backoff, || async {
        match op().await {
            Ok(value) => Ok(value),
            Err(err @ CoreError::StorageUnavailable { .. }) => {
                warn!(op = label, error = %err, "Transient storage failure, retrying");
                Err(backoff::Error::transient(err))
            }
            Err(err) => Err(backoff::Error::permanent(err)),
        }
    })
    .await
}
