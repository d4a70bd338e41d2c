use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use notification_pipeline::{
    models::retry::BackoffConfig,
    utils::{Poll, poll_with_backoff},
};
use tokio::time::Instant;

fn config(initial_ms: u64, timeout_ms: u64) -> BackoffConfig {
    BackoffConfig::new(
        Duration::from_millis(initial_ms),
        Duration::from_millis(timeout_ms),
    )
}

/// Test: A ready result on the first attempt returns without waiting
#[tokio::test]
async fn test_ready_on_first_attempt() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let start = Instant::now();
    let value = poll_with_backoff(&config(200, 2000), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Poll::Ready("done"))
        }
    })
    .await?;

    assert_eq!(value, "done");
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() < Duration::from_millis(200));

    Ok(())
}

/// Test: Pending attempts are repeated until the operation is ready
#[tokio::test]
async fn test_pending_then_ready() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let value = poll_with_backoff(&config(10, 2000), || {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Ok(Poll::Pending(format!("attempt {} not ready", attempt)))
            } else {
                Ok(Poll::Ready(attempt))
            }
        }
    })
    .await?;

    assert_eq!(value, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: An error stops polling immediately
#[tokio::test]
async fn test_error_is_not_retried() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result: Result<()> = poll_with_backoff(&config(10, 2000), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow!("request rejected"))
        }
    })
    .await;

    let err = result.err().ok_or_else(|| anyhow!("expected an error"))?;
    assert!(err.to_string().contains("request rejected"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Polling gives up at the deadline and reports the last reason
#[tokio::test]
async fn test_timeout_reports_last_reason() -> Result<()> {
    let start = Instant::now();

    let result: Result<()> = poll_with_backoff(&config(20, 150), || async {
        Ok(Poll::Pending("still processing".to_string()))
    })
    .await;

    let err = result.err().ok_or_else(|| anyhow!("expected a timeout"))?;
    let message = err.to_string();
    assert!(message.contains("not ready after"), "unexpected error: {}", message);
    assert!(message.contains("still processing"));

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(600), "waits must not overshoot the deadline");

    Ok(())
}

/// Test: Waits between attempts double
#[tokio::test]
async fn test_exponential_backoff_timing() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let start = Instant::now();
    poll_with_backoff(&config(50, 5000), || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                Ok(Poll::Pending("pending".to_string()))
            } else {
                Ok(Poll::Ready(()))
            }
        }
    })
    .await?;

    // 50 + 100 + 200
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(350));
    assert!(elapsed < Duration::from_millis(1500));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    Ok(())
}

/// Test: Delays saturate instead of overflowing
#[test]
fn test_delay_for_saturates() {
    let config = config(1000, 1000);

    assert_eq!(config.delay_for(0), Duration::from_secs(1));
    assert_eq!(config.delay_for(3), Duration::from_secs(8));
    assert!(config.delay_for(64) >= config.delay_for(31));
}
