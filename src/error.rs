//! mimir error types

/// Errors surfaced by the resolution pipeline and its backends.
#[derive(Debug, thiserror::Error)]
pub enum MimirError {
    // Infrastructure errors (degraded locally by the resolver)
    #[error("shared tier error: {0}")]
    SharedTier(String),

    #[error("durable store error: {0}")]
    Store(String),

    #[error("lease backend error: {0}")]
    Lock(String),

    // Contention
    /// Another instance held the lease for `key` and no result appeared
    /// within the polling budget. Safe to retry.
    #[error("timed out waiting for in-flight generation of {key} after {attempts} attempts")]
    ContentionTimeout { key: String, attempts: u32 },

    // Generation errors
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("generator returned no text")]
    EmptyGeneration,

    #[error("rate limited by generation backend")]
    RateLimited,

    #[error("generation backend unavailable: {0}")]
    Unavailable(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MimirError {
    /// Infrastructure failures the resolver recovers from by skipping a tier.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MimirError::SharedTier(_)
                | MimirError::Store(_)
                | MimirError::Lock(_)
                | MimirError::RateLimited
                | MimirError::Unavailable(_)
        )
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MimirError::ContentionTimeout { .. }) || self.is_transient()
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for MimirError {
    fn from(err: redis::RedisError) -> Self {
        MimirError::SharedTier(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for MimirError {
    fn from(err: sqlx::Error) -> Self {
        MimirError::Store(err.to_string())
    }
}

#[cfg(feature = "llm")]
impl From<llm::error::LLMError> for MimirError {
    fn from(err: llm::error::LLMError) -> Self {
        let msg = err.to_string();
        if msg.contains("rate limit") || msg.contains("429") {
            MimirError::RateLimited
        } else if msg.contains("timed out")
            || msg.contains("connection")
            || msg.contains("502")
            || msg.contains("503")
        {
            MimirError::Unavailable(msg)
        } else {
            MimirError::Generation(msg)
        }
    }
}

/// Result type alias for mimir operations
pub type Result<T> = std::result::Result<T, MimirError>;
