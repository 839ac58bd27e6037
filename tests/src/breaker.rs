use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use steward_core::backends::BackendId;
use steward_core::breaker::{
    BreakerState, CircuitBreakerRegistry, Clock, DEFAULT_RESET_TIMEOUT_MS, DEFAULT_THRESHOLD,
};
use steward_core::store::BreakerStore;

use crate::fixtures::TestResult;

struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

async fn registry() -> TestResult<(tempfile::TempDir, Arc<ManualClock>, CircuitBreakerRegistry)> {
    let tmp = tempfile::tempdir()?;
    let store = Arc::new(BreakerStore::open(&tmp.path().join("red-metrics.sqlite")).await?);
    let clock = Arc::new(ManualClock::new(1_000));
    let registry = CircuitBreakerRegistry::new(store, clock.clone());
    Ok((tmp, clock, registry))
}

#[tokio::test]
async fn breaker_opens_then_recovers() -> TestResult {
    let (_tmp, clock, registry) = registry().await?;
    let backend = BackendId::Codex;

    // Below the threshold the backend stays available.
    for _ in 0..DEFAULT_THRESHOLD - 1 {
        registry.on_failure(backend).await;
        assert!(registry.is_available(backend).await);
    }

    // The threshold failure opens it.
    registry.on_failure(backend).await;
    assert!(!registry.is_available(backend).await);

    // Reset timeout plus a millisecond: the next check admits one trial.
    clock.advance(DEFAULT_RESET_TIMEOUT_MS + 1);
    assert!(registry.is_available(backend).await);
    assert_eq!(registry.state(backend), BreakerState::HalfOpen);

    registry.on_success(backend).await;
    assert_eq!(registry.state(backend), BreakerState::Closed { failures: 0 });
    Ok(())
}

#[tokio::test]
async fn half_open_failure_reopens_with_a_fresh_window() -> TestResult {
    let (_tmp, clock, registry) = registry().await?;
    let backend = BackendId::Claude;

    for _ in 0..DEFAULT_THRESHOLD {
        registry.on_failure(backend).await;
    }
    clock.advance(DEFAULT_RESET_TIMEOUT_MS + 1);
    assert!(registry.is_available(backend).await);

    registry.on_failure(backend).await;
    assert!(!registry.is_available(backend).await);

    // The reopened window starts over; half a timeout is not enough.
    clock.advance(DEFAULT_RESET_TIMEOUT_MS / 2);
    assert!(!registry.is_available(backend).await);
    clock.advance(DEFAULT_RESET_TIMEOUT_MS);
    assert!(registry.is_available(backend).await);
    Ok(())
}

#[tokio::test]
async fn persisted_state_survives_process_restart() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("red-metrics.sqlite");
    let clock = Arc::new(ManualClock::new(1_000));

    {
        let store = Arc::new(BreakerStore::open(&path).await?);
        let registry = CircuitBreakerRegistry::new(store, clock.clone());
        for _ in 0..DEFAULT_THRESHOLD {
            registry.on_failure(BackendId::Gemini).await;
        }
        registry.shutdown().await;
    }

    let store = Arc::new(BreakerStore::open(&path).await?);
    let registry = CircuitBreakerRegistry::new(store, clock.clone());
    registry.load().await?;

    assert!(!registry.is_available(BackendId::Gemini).await);
    assert!(registry.is_available(BackendId::Claude).await);

    registry.reset(Some(BackendId::Gemini)).await;
    assert!(registry.is_available(BackendId::Gemini).await);
    Ok(())
}
