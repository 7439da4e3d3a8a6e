//! Optimistic read-modify-write loop

use std::future::Future;
use tracing::warn;

use crate::error::Result;

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `attempts` runs have hit a write conflict.
///
/// `op` must re-read everything it depends on each time it runs.
pub async fn with_retries<T, F, Fut>(attempts: u32, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(operation = label, attempt, error = %err, "Write conflict, retrying");
                attempt += 1;
                tokio::task::yield_now().await;
            }
            other => return other,
        }
    }
}
