mod circuit_breaker;
mod retry;

use std::time::Duration;

use thiserror::Error;

pub(crate) use circuit_breaker::CircuitBreaker;
#[cfg(test)]
pub(crate) use circuit_breaker::CircuitState;
pub(crate) use retry::{RetryExecutor, RetryPolicy};

/// Classification hook for errors passed through [`RetryExecutor`].
pub(crate) trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-provided minimum wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Error)]
pub(crate) enum ResilienceError<E> {
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error("non-retryable failure: {0}")]
    NonRetryable(E),
}

impl<E> ResilienceError<E> {
    pub(crate) fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// The underlying operation error, if the operation ran at all.
    pub(crate) fn inner(&self) -> Option<&E> {
        match self {
            Self::CircuitOpen { .. } => None,
            Self::Exhausted { last, .. } => Some(last),
            Self::NonRetryable(err) => Some(err),
        }
    }
}
