use std::time::Duration;

use thiserror::Error;

/// Errors raised by an [`AiClient`](super::AiClient) call.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("AI API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid AI response: {0}")]
    InvalidResponse(String),

    #[error("AI client not configured: {0}")]
    NotConfigured(String),
}

impl AiError {
    /// Whether repeating the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::Timeout(_) | AiError::RateLimited { .. } | AiError::Network(_) => true,
            AiError::Api { status, .. } => *status >= 500 || matches!(status, 408 | 409 | 429),
            AiError::InvalidResponse(_) | AiError::NotConfigured(_) => false,
        }
    }
}
