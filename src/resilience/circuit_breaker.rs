//! Circuit breaker for calls to downstream dependencies.
//!
//! Count-based sliding window: the last `window_size` call results are kept,
//! and once `minimum_calls` have been recorded the breaker opens when either
//! the failure ratio or the slow-call ratio reaches its threshold. An open
//! breaker rejects calls until `open_cooldown` elapses, then admits a limited
//! number of trial calls (half-open). All trials succeeding closes it; any
//! trial failing reopens it.
//!
//! Breakers are shared across all transfers through a
//! [`CircuitBreakerRegistry`] keyed by dependency name.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// A limited number of trial calls are admitted
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of most recent calls considered
    pub window_size: usize,
    /// Calls required in the window before ratios are evaluated
    pub minimum_calls: usize,
    /// Failure ratio (0.0 to 1.0) that opens the breaker
    pub failure_rate_threshold: f64,
    /// Slow-call ratio (0.0 to 1.0) that opens the breaker
    pub slow_call_rate_threshold: f64,
    /// Calls taking at least this long count as slow
    pub slow_call_duration: Duration,
    /// How long the breaker stays open before admitting trial calls
    pub open_cooldown: Duration,
    /// Trial calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            minimum_calls: 10,
            failure_rate_threshold: 0.5,
            slow_call_rate_threshold: 0.8,
            slow_call_duration: Duration::from_millis(1500),
            open_cooldown: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

/// Errors returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker rejected the call without running it.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The call ran and failed.
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
    failed: bool,
    slow: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    window: VecDeque<CallRecord>,
    opened_at: Option<Instant>,
    half_open_admitted: u32,
    half_open_succeeded: u32,
}

/// A single dependency's circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.window_size),
                opened_at: None,
                half_open_admitted: 0,
                half_open_succeeded: 0,
            }),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, moving OPEN to HALF_OPEN if the cooldown has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `operation` through the breaker.
    ///
    /// `is_failure` decides which errors count against the dependency; errors
    /// it returns `false` for (business rejections) are recorded as successes.
    pub async fn call<T, E, F, Fut>(
        &self,
        operation: F,
        is_failure: impl Fn(&E) -> bool,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitBreakerError::Open {
                name: self.name.clone(),
            });
        }

        let mut admission = Admission {
            breaker: self,
            settled: false,
        };
        let started = Instant::now();
        let result = operation().await;
        let failed = matches!(&result, Err(e) if is_failure(e));
        admission.settled = true;
        self.record(failed, started.elapsed());

        result.map_err(CircuitBreakerError::Inner)
    }

    /// Give back a half-open trial slot whose call was cancelled.
    fn release(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_admitted = inner.half_open_admitted.saturating_sub(1);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .opened_at
                .is_none_or(|at| at.elapsed() >= self.config.open_cooldown);
            if cooled_down {
                debug!(breaker = %self.name, "Circuit breaker transitioning from Open to HalfOpen");
                inner.state = CircuitState::HalfOpen;
                inner.half_open_admitted = 0;
                inner.half_open_succeeded = 0;
            }
        }
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_admitted < self.config.half_open_max_calls {
                    inner.half_open_admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record(&self, failed: bool, elapsed: Duration) {
        let slow = elapsed >= self.config.slow_call_duration;
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.window.push_back(CallRecord { failed, slow });
                while inner.window.len() > self.config.window_size {
                    inner.window.pop_front();
                }

                if inner.window.len() >= self.config.minimum_calls {
                    let total = inner.window.len() as f64;
                    let failures = inner.window.iter().filter(|c| c.failed).count() as f64;
                    let slow_calls = inner.window.iter().filter(|c| c.slow).count() as f64;
                    let failure_rate = failures / total;
                    let slow_rate = slow_calls / total;

                    if failure_rate >= self.config.failure_rate_threshold
                        || slow_rate >= self.config.slow_call_rate_threshold
                    {
                        warn!(
                            breaker = %self.name,
                            failure_rate,
                            slow_rate,
                            "Circuit breaker opening"
                        );
                        self.open(&mut inner);
                    }
                }
            }
            CircuitState::HalfOpen => {
                if failed {
                    debug!(breaker = %self.name, "Trial call failed while half-open");
                    self.open(&mut inner);
                } else {
                    inner.half_open_succeeded += 1;
                    if inner.half_open_succeeded >= self.config.half_open_max_calls {
                        info!(breaker = %self.name, "Circuit breaker closed");
                        inner.state = CircuitState::Closed;
                        inner.window.clear();
                        inner.opened_at = None;
                    }
                }
            }
            // A call admitted before the breaker opened finished late
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.half_open_admitted = 0;
        inner.half_open_succeeded = 0;
        error!(breaker = %self.name, "Circuit breaker state changed to Open");
    }
}

/// Tracks an admitted call so a cancelled one does not hold a trial slot.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release();
        }
    }
}

/// Breakers keyed by dependency name, shared by every caller of that
/// dependency so a degraded service sheds load platform-wide.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `dependency`, created on first use.
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.config.clone())))
            .clone()
    }

    /// Current state of every registered breaker, sorted by name.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut states: Vec<(String, CircuitState)> = breakers
            .iter()
            .map(|b| (b.name().to_string(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
