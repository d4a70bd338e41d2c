use std::time::{Duration, Instant};

use anyhow::Result;
use notification_pipeline::rate_limit::RateLimiter;

/// Test: Exactly the burst passes, then requests are rejected with a wait hint
#[test]
fn test_burst_then_reject() {
    let limiter = RateLimiter::new(2, 3);
    let now = Instant::now();

    for _ in 0..3 {
        assert!(limiter.try_acquire_at(now).is_ok());
    }

    let wait = limiter.try_acquire_at(now).err();
    assert!(matches!(wait, Some(d) if d > Duration::ZERO && d <= Duration::from_millis(500)));
}

/// Test: Tokens refill over time up to the burst size
#[test]
fn test_refill_after_wait() -> Result<()> {
    let limiter = RateLimiter::new(2, 3);
    let start = Instant::now();

    for _ in 0..3 {
        assert!(limiter.try_acquire_at(start).is_ok());
    }
    assert!(limiter.try_acquire_at(start).is_err());

    let later = start + Duration::from_millis(600);
    assert!(limiter.try_acquire_at(later).is_ok());
    assert!(limiter.try_acquire_at(later).is_err());

    // A long idle period never banks more than the burst.
    let idle = later + Duration::from_secs(60);
    for _ in 0..3 {
        assert!(limiter.try_acquire_at(idle).is_ok());
    }
    assert!(limiter.try_acquire_at(idle).is_err());

    Ok(())
}

/// Test: An earlier timestamp than the last refill does not mint tokens
#[test]
fn test_clock_going_backwards_is_ignored() {
    let limiter = RateLimiter::new(1, 1);
    let now = Instant::now() + Duration::from_secs(1);

    assert!(limiter.try_acquire_at(now).is_ok());
    assert!(limiter.try_acquire_at(now - Duration::from_millis(500)).is_err());
}
