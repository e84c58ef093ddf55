//! Fixed-window rate limiting over the file tier with a controllable clock.

use std::sync::Arc;
use std::time::Duration;

use cachet_cache::{Cache, FileStore, Keyspace, ManualClock, RateLimitPolicy, RateLimiter};
use tempfile::TempDir;

fn limiter(dir: &TempDir) -> (RateLimiter, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let store = FileStore::new(dir.path(), Keyspace::new("rl-test:"))
        .with_clock(clock.clone())
        .with_lock_timeout(Duration::from_secs(10));
    let cache = Cache::builder().file(store).build().unwrap();
    (RateLimiter::new(cache, RateLimitPolicy::default()), clock)
}

#[tokio::test]
async fn hundred_admitted_then_rejected_until_window_resets() {
    let dir = TempDir::new().unwrap();
    let (limiter, clock) = limiter(&dir);

    for n in 1..=100 {
        let decision = limiter.check("10.0.0.1").await.unwrap();
        assert!(decision.allowed, "request {n} should be admitted");
        assert_eq!(decision.count, n);
        assert_eq!(decision.remaining, 100 - n);
    }

    let rejected = limiter.check("10.0.0.1").await.unwrap();
    assert!(!rejected.allowed);
    assert_eq!(rejected.remaining, 0);
    assert_eq!(rejected.reset_after, Duration::from_secs(60));

    // another client has its own window
    assert!(limiter.check("10.0.0.2").await.unwrap().allowed);

    clock.advance(Duration::from_secs(61));
    for _ in 0..100 {
        assert!(limiter.check("10.0.0.1").await.unwrap().allowed);
    }
    assert!(!limiter.check("10.0.0.1").await.unwrap().allowed);
}

#[tokio::test]
async fn window_expiry_is_set_on_first_request() {
    let dir = TempDir::new().unwrap();
    let (limiter, clock) = limiter(&dir);

    limiter.check("client").await.unwrap();
    clock.advance(Duration::from_secs(45));
    let decision = limiter.check("client").await.unwrap();
    assert_eq!(decision.count, 2);
    assert_eq!(decision.reset_after, Duration::from_secs(15));
}

#[tokio::test]
async fn concurrent_requests_never_exceed_the_limit() {
    let dir = TempDir::new().unwrap();
    let (limiter, _) = limiter(&dir);

    let mut tasks = Vec::new();
    for _ in 0..150 {
        let limiter = limiter.clone();
        tasks.push(tokio::spawn(async move { limiter.check("burst").await }));
    }
    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 100);
}
