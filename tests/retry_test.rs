//! Tests for generator retry on transient errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use mimir::{
    Category, GenerateEvent, GenerateStream, Generator, MimirError, ResolveRequest, Resolver,
    Result, RetryConfig, RetryingGenerator, Source, WarmupConfig,
};

/// Fails the first `failures` calls with `error`, then answers "ok".
struct FlakyGenerator {
    calls: AtomicU32,
    failures: u32,
    error: fn() -> MimirError,
}

impl FlakyGenerator {
    fn new(failures: u32, error: fn() -> MimirError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures,
            error,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FlakyGenerator {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn generate_stream(&self, _category: Category, _text: &str) -> Result<GenerateStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err((self.error)());
        }
        let events = vec![
            Ok(GenerateEvent::Text("ok".to_string())),
            Ok(GenerateEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

fn unavailable() -> MimirError {
    MimirError::Unavailable("503 service unavailable".into())
}

fn rate_limited() -> MimirError {
    MimirError::RateLimited
}

fn refused() -> MimirError {
    MimirError::Generation("prompt rejected".into())
}

fn quick_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(100))
}

#[tokio::test(start_paused = true)]
async fn transient_errors_are_retried() {
    let inner = FlakyGenerator::new(2, unavailable);
    let generator = RetryingGenerator::new(inner.clone(), quick_retry(3));

    let text = generator.generate(Category::Code, "q").await.unwrap();
    assert_eq!(text, "ok");
    assert_eq!(inner.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_give_up_after_max_attempts() {
    let inner = FlakyGenerator::new(5, rate_limited);
    let generator = RetryingGenerator::new(inner.clone(), quick_retry(3));

    let err = generator.generate(Category::Code, "q").await.unwrap_err();
    assert!(matches!(err, MimirError::RateLimited));
    assert_eq!(inner.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_are_not_retried() {
    let inner = FlakyGenerator::new(1, refused);
    let generator = RetryingGenerator::new(inner.clone(), quick_retry(3));

    let err = generator.generate(Category::Code, "q").await.unwrap_err();
    assert!(matches!(err, MimirError::Generation(_)));
    assert_eq!(inner.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn resolver_retries_when_configured() {
    let inner = FlakyGenerator::new(1, unavailable);
    let resolver = Resolver::builder()
        .generator(inner.clone())
        .retry(quick_retry(2))
        .warmup(WarmupConfig::disabled())
        .without_maintenance()
        .build()
        .await
        .unwrap();

    let resolution = resolver
        .resolve(ResolveRequest::new(1, Category::Code, "q"))
        .await
        .unwrap();
    assert_eq!(resolution.source, Source::Generated);
    assert_eq!(resolution.text(), "ok");
    assert_eq!(inner.calls(), 2);
}

#[tokio::test]
async fn resolver_without_retry_fails_fast() {
    let inner = FlakyGenerator::new(1, unavailable);
    let resolver = Resolver::builder()
        .generator(inner.clone())
        .warmup(WarmupConfig::disabled())
        .without_maintenance()
        .build()
        .await
        .unwrap();

    let err = resolver
        .resolve(ResolveRequest::new(1, Category::Code, "q"))
        .await
        .unwrap_err();
    assert!(matches!(err, MimirError::Unavailable(_)));
    assert_eq!(inner.calls(), 1);
}
