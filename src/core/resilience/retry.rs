use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use super::{CircuitBreaker, ResilienceError, Retryable};
use crate::core::config::RetrySettings;

#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    /// Retries after the first attempt.
    pub(crate) max_retries: u32,
    pub(crate) base_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) multiplier: f64,
    pub(crate) jitter: bool,
}

impl RetryPolicy {
    pub(crate) fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
            multiplier: 2.0,
            jitter: true,
        }
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before retry number `attempt + 1` (zero-based `attempt`).
    ///
    /// `jitter_sample` is in `[0, 1)` and scales the delay into `[0.5, 1.0)` of
    /// its nominal value when jitter is enabled.
    pub(crate) fn delay(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        jitter_sample: f64,
    ) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nominal = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();
        let mut delay = if nominal.is_finite() { nominal.min(max) } else { max };

        if let Some(retry_after) = retry_after {
            delay = delay.max(retry_after.as_secs_f64()).min(max);
        }

        if self.jitter {
            delay *= 0.5 + jitter_sample.clamp(0.0, 1.0) * 0.5;
        }

        Duration::from_secs_f64(delay.clamp(0.0, max))
    }
}

/// Runs an async operation with exponential backoff, optionally behind a
/// shared [`CircuitBreaker`].
#[derive(Clone)]
pub(crate) struct RetryExecutor {
    name: String,
    policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RetryExecutor {
    pub(crate) fn new(
        name: impl Into<String>,
        policy: RetryPolicy,
        breaker: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        Self { name: name.into(), policy, breaker }
    }

    /// `op` receives the zero-based attempt number.
    pub(crate) async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, ResilienceError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            if let Some(breaker) = &self.breaker {
                if !breaker.try_acquire() {
                    tracing::debug!(
                        operation = %self.name,
                        breaker = %breaker.name(),
                        "Call rejected by open circuit breaker"
                    );
                    return Err(ResilienceError::CircuitOpen { name: breaker.name().to_string() });
                }
            }

            let err = match op(attempt).await {
                Ok(value) => {
                    if let Some(breaker) = &self.breaker {
                        breaker.record_success();
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                // The remote side answered; the circuit stays healthy.
                if let Some(breaker) = &self.breaker {
                    breaker.record_success();
                }
                tracing::debug!(operation = %self.name, error = %err, "Non-retryable failure");
                return Err(ResilienceError::NonRetryable(err));
            }

            if let Some(breaker) = &self.breaker {
                breaker.record_failure();
            }

            if attempt + 1 >= attempts {
                tracing::error!(
                    operation = %self.name,
                    attempts,
                    error = %err,
                    "Retry attempts exhausted"
                );
                return Err(ResilienceError::Exhausted { attempts, last: err });
            }

            let sample = rand::thread_rng().gen::<f64>();
            let delay = self.policy.delay(attempt, err.retry_after(), sample);
            tracing::warn!(
                operation = %self.name,
                attempt = attempt + 1,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
