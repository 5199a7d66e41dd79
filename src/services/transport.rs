use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::resilience::Retryable;

/// Outbound chat channel used to deliver mentor notifications.
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    /// Sends `text` to `chat_id` and returns the transport's message id.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<String, TransportError>;
}

#[derive(Debug, Error)]
pub(crate) enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error: HTTP {status}")]
    Server { status: u16 },
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("rejected with HTTP {status}: {description}")]
    Rejected { status: u16, description: String },
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::Server { .. } | Self::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
