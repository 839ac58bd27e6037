use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backends::BackendId;
use crate::logging::{self, LogCategory};
use crate::store::{BreakerStore, PersistedBreaker, StoreError};

pub const DEFAULT_THRESHOLD: u32 = 3;
pub const DEFAULT_RESET_TIMEOUT_MS: i64 = 5 * 60 * 1000;

/// Time source seam so tests can advance the clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: i64 },
    HalfOpen,
}

impl BreakerState {
    fn to_row(self, backend: BackendId, last_failure_ms: Option<i64>) -> PersistedBreaker {
        let (state, failures, last_failure_time) = match self {
            BreakerState::Closed { failures } => (0, i64::from(failures), last_failure_ms),
            BreakerState::Open { opened_at } => (1, i64::from(DEFAULT_THRESHOLD), Some(opened_at)),
            BreakerState::HalfOpen => (2, 0, last_failure_ms),
        };
        PersistedBreaker {
            backend: backend.as_str().to_string(),
            state,
            failures,
            last_failure_time,
        }
    }

    fn from_row(row: &PersistedBreaker) -> Self {
        match row.state {
            1 => BreakerState::Open {
                opened_at: row.last_failure_time.unwrap_or(0),
            },
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed {
                failures: row.failures.max(0) as u32,
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct BackendBreaker {
    state: BreakerState,
    last_failure_ms: Option<i64>,
}

impl BackendBreaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            last_failure_ms: None,
        }
    }
}

/// Per-backend closed/open/half-open machines. Every mutation is persisted
/// before the call returns; a persist failure is logged and swallowed so
/// it never masks the caller's real error.
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<BackendId, BackendBreaker>>,
    store: Arc<BreakerStore>,
    clock: Arc<dyn Clock>,
    threshold: u32,
    reset_timeout_ms: i64,
}

impl CircuitBreakerRegistry {
    pub fn new(store: Arc<BreakerStore>, clock: Arc<dyn Clock>) -> Self {
        let breakers = BackendId::all()
            .iter()
            .map(|backend| (*backend, BackendBreaker::new()))
            .collect();
        Self {
            breakers: Mutex::new(breakers),
            store,
            clock,
            threshold: DEFAULT_THRESHOLD,
            reset_timeout_ms: DEFAULT_RESET_TIMEOUT_MS,
        }
    }

    pub fn with_limits(mut self, threshold: u32, reset_timeout_ms: i64) -> Self {
        self.threshold = threshold;
        self.reset_timeout_ms = reset_timeout_ms;
        self
    }

    /// Seed in-memory state from the persisted rows.
    pub async fn load(&self) -> Result<(), StoreError> {
        let rows = self.store.load_all().await?;
        let mut breakers = self.breakers.lock();
        for row in rows {
            let Some(backend) = BackendId::parse(&row.backend) else {
                continue;
            };
            breakers.insert(
                backend,
                BackendBreaker {
                    state: BreakerState::from_row(&row),
                    last_failure_ms: row.last_failure_time,
                },
            );
        }
        Ok(())
    }

    pub fn state(&self, backend: BackendId) -> BreakerState {
        self.breakers
            .lock()
            .get(&backend)
            .map(|breaker| breaker.state)
            .unwrap_or(BreakerState::Closed { failures: 0 })
    }

    /// Whether `backend` may take a call right now. An open breaker whose
    /// reset timeout elapsed transitions to half-open and admits exactly
    /// one trial call.
    pub async fn is_available(&self, backend: BackendId) -> bool {
        let now = self.clock.now_ms();
        let (available, transitioned) = {
            let mut breakers = self.breakers.lock();
            let breaker = breakers.entry(backend).or_insert_with(BackendBreaker::new);
            match breaker.state {
                BreakerState::Closed { .. } | BreakerState::HalfOpen => (true, None),
                BreakerState::Open { opened_at } => {
                    if now - opened_at >= self.reset_timeout_ms {
                        breaker.state = BreakerState::HalfOpen;
                        (true, Some(*breaker))
                    } else {
                        (false, None)
                    }
                }
            }
        };

        if let Some(breaker) = transitioned {
            logging::info(
                LogCategory::AiBackend,
                format!("breaker for {backend} reset timeout elapsed; entering half-open"),
            );
            self.persist(backend, breaker).await;
        }
        available
    }

    pub async fn on_success(&self, backend: BackendId) {
        let updated = {
            let mut breakers = self.breakers.lock();
            let breaker = breakers.entry(backend).or_insert_with(BackendBreaker::new);
            breaker.state = BreakerState::Closed { failures: 0 };
            *breaker
        };
        self.persist(backend, updated).await;
    }

    pub async fn on_failure(&self, backend: BackendId) {
        let now = self.clock.now_ms();
        let (updated, opened) = {
            let mut breakers = self.breakers.lock();
            let breaker = breakers.entry(backend).or_insert_with(BackendBreaker::new);
            breaker.last_failure_ms = Some(now);
            let opened = match breaker.state {
                BreakerState::Closed { failures } => {
                    let failures = failures + 1;
                    if failures >= self.threshold {
                        breaker.state = BreakerState::Open { opened_at: now };
                        true
                    } else {
                        breaker.state = BreakerState::Closed { failures };
                        false
                    }
                }
                // A failed trial call reopens immediately.
                BreakerState::HalfOpen => {
                    breaker.state = BreakerState::Open { opened_at: now };
                    true
                }
                BreakerState::Open { .. } => false,
            };
            (*breaker, opened)
        };

        if opened {
            logging::warn(
                LogCategory::AiBackend,
                format!("circuit breaker for {backend} opened"),
            );
        }
        self.persist(backend, updated).await;
    }

    /// Clear one backend (or all) in memory and in the store.
    pub async fn reset(&self, backend: Option<BackendId>) {
        {
            let mut breakers = self.breakers.lock();
            match backend {
                Some(backend) => {
                    breakers.insert(backend, BackendBreaker::new());
                }
                None => {
                    for breaker in breakers.values_mut() {
                        *breaker = BackendBreaker::new();
                    }
                }
            }
        }
        if let Err(err) = self
            .store
            .clear(backend.map(|b| b.as_str().to_string()))
            .await
        {
            logging::error(
                LogCategory::AiBackend,
                format!("failed clearing persisted breaker state: {err}"),
            );
        }
    }

    /// Persist every breaker; called at shutdown.
    pub async fn shutdown(&self) {
        let snapshot: Vec<(BackendId, BackendBreaker)> = {
            let breakers = self.breakers.lock();
            breakers.iter().map(|(id, breaker)| (*id, *breaker)).collect()
        };
        for (backend, breaker) in snapshot {
            self.persist(backend, breaker).await;
        }
    }

    async fn persist(&self, backend: BackendId, breaker: BackendBreaker) {
        let row = breaker.state.to_row(backend, breaker.last_failure_ms);
        if let Err(err) = self.store.save(row).await {
            logging::error(
                LogCategory::AiBackend,
                format!("failed persisting breaker state for {backend}: {err}"),
            );
        }
    }
}
