//! Retry policy and the retrying generator decorator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::{GenerateStream, Generator};
use crate::telemetry;
use crate::types::Category;
use crate::Result;

/// Exponential backoff policy for transient generator errors.
///
/// ```rust
/// # use mimir::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first. 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Cap on the exponential delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, never retry.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// `initial_delay * 2^attempt`, capped at `max_delay`. `attempt` is 0-indexed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

/// Run `f` until it succeeds, fails permanently, or attempts run out.
///
/// Only errors classified by [`MimirError::is_transient`](crate::MimirError::is_transient) are retried.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, generator: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                metrics::counter!(telemetry::GENERATION_RETRIES_TOTAL, "generator" => generator.to_owned())
                    .increment(1);
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    generator,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying generation after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decorator retrying a [`Generator`] on transient errors.
///
/// Only the initial connection is retried. Once a stream has started,
/// failures inside it surface unchanged: replaying would duplicate the
/// fragments already relayed to the caller.
pub struct RetryingGenerator {
    inner: Arc<dyn Generator>,
    config: RetryConfig,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn Generator>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Generator for RetryingGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate_stream(&self, category: Category, text: &str) -> Result<GenerateStream> {
        with_retry(&self.config, self.inner.name(), || {
            self.inner.generate_stream(category, text)
        })
        .await
    }
}
