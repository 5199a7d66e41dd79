use std::sync::{Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

use crate::core::time::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<OffsetDateTime>,
    trial_in_flight: bool,
}

/// Consecutive-failure breaker.
///
/// Closed until `failure_threshold` failures in a row, then open. Once
/// `recovery_timeout` has passed since opening, exactly one trial call is let
/// through (half-open): success closes the circuit, failure reopens it and
/// restarts the cool-down.
pub(crate) struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub(crate) fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_timeout: std::time::Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout: Duration::try_from(recovery_timeout).unwrap_or(Duration::MAX),
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    /// Asks for permission to make a call. `false` means reject without calling.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let now = self.clock.now();
                let cooled = inner
                    .opened_at
                    .map(|opened_at| now - opened_at >= self.recovery_timeout)
                    .unwrap_or(true);
                if !cooled {
                    return false;
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(
                    breaker = %self.name,
                    "Circuit breaker half-open, allowing trial call"
                );
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return false;
                }
                inner.trial_in_flight = true;
                true
            }
        }
    }

    pub(crate) fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state != CircuitState::Closed {
            tracing::info!(breaker = %self.name, "Circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub(crate) fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.trial_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if !should_open {
            return;
        }

        inner.state = CircuitState::Open;
        inner.opened_at = Some(self.clock.now());
        metrics::counter!("circuit_breaker_open_total", "breaker" => self.name.clone())
            .increment(1);
        tracing::warn!(
            breaker = %self.name,
            consecutive_failures = inner.consecutive_failures,
            recovery_timeout_seconds = self.recovery_timeout.whole_seconds(),
            "Circuit breaker opened"
        );
    }
}
