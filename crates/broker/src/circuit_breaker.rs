//! Consecutive-failure circuit breaker with a timed cooldown.
//!
//! There is no half-open state: once the cooldown has elapsed the breaker is
//! closed again with a zeroed counter, and the next call goes through
//! normally. The cooldown is checked lazily on each call, so no timer task
//! outlives the breaker.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub is_open: bool,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl BreakerState {
    /// Closes the circuit if its cooldown has elapsed.
    fn refresh(&mut self, now: Instant) {
        if self.open_until.is_some_and(|until| now >= until) {
            self.open_until = None;
            self.consecutive_failures = 0;
        }
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refresh(Instant::now());
        state
    }

    /// Returns true while calls should fail fast.
    pub fn is_open(&self) -> bool {
        self.lock().open_until.is_some()
    }

    /// Records a successful call, resetting the failure counter.
    pub fn record_success(&self) {
        self.lock().consecutive_failures = 0;
    }

    /// Records a failed call.
    ///
    /// Returns true if this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut state = self.lock();
        state.consecutive_failures += 1;

        if state.open_until.is_none()
            && state.consecutive_failures >= self.config.failure_threshold
        {
            state.open_until = Some(Instant::now() + self.config.cooldown);
            return true;
        }
        false
    }

    pub fn state(&self) -> CircuitBreakerState {
        let state = self.lock();
        CircuitBreakerState {
            is_open: state.open_until.is_some(),
            consecutive_failures: state.consecutive_failures,
            cooldown_until: state.open_until,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
