use anyhow::{Error, Result, anyhow};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::models::retry::BackoffConfig;

/// Result of one polling attempt.
#[derive(Debug)]
pub enum Poll<T> {
    Ready(T),
    /// Not ready yet; the reason is kept for the timeout error.
    Pending(String),
}

/// Repeats `operation` with exponential backoff until it reports `Ready`,
/// fails outright, or the overall timeout elapses. Waits never extend past
/// the deadline.
pub async fn poll_with_backoff<F, Fut, T>(config: &BackoffConfig, mut operation: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Poll<T>, Error>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut attempt: u32 = 0;
    let mut last_reason = String::from("no attempt made");

    while Instant::now() < deadline {
        match operation().await? {
            Poll::Ready(value) => {
                if attempt > 0 {
                    info!(attempt, "Polling succeeded after retries");
                }
                return Ok(value);
            }
            Poll::Pending(reason) => {
                let delay = config.delay_for(attempt);
                let remaining = deadline.saturating_duration_since(Instant::now());

                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "Not ready, backing off"
                );

                last_reason = reason;
                attempt = attempt.saturating_add(1);
                sleep(delay.min(remaining)).await;
            }
        }
    }

    warn!(
        attempts = attempt,
        timeout_ms = config.timeout.as_millis() as u64,
        "Polling timed out"
    );

    Err(anyhow!(
        "not ready after {:?}, last error: {}",
        config.timeout,
        last_reason
    ))
}

/// Splits `items` into consecutive chunks of at most `batch_size`, keeping order.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);

    for item in items {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(batch_size),
            ));
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_sizes() {
        for len in 0..35usize {
            for batch_size in 1..12usize {
                let items: Vec<usize> = (0..len).collect();
                let batches = partition(items.clone(), batch_size);

                assert_eq!(batches.len(), len.div_ceil(batch_size));
                assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= batch_size));
                assert_eq!(batches.concat(), items);
            }
        }
    }

    #[test]
    fn test_partition_zero_batch_size_is_one() {
        let batches = partition(vec![1, 2, 3], 0);
        assert_eq!(batches, vec![vec![1], vec![2], vec![3]]);
    }
}
