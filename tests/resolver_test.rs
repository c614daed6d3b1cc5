//! End-to-end tests for the resolution pipeline using in-memory backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use mimir::{
    Acquire, AccessHistoryEntry, Category, ContentKey, DurableStore, GenerateEvent,
    GenerateStream, Generator, LeaseLock, LockConfig, LockLease, MemoryLeaseLock,
    MemorySharedTier, MemoryStore, MimirError, Release, RequesterId, ResolveRequest,
    ResolvedPayload, Resolver, Result, Source, WarmupConfig,
};

// ============================================================================
// Mock backends
// ============================================================================

/// Answers "answer to {text}" in two fragments after `delay`, counting calls.
struct CountingGenerator {
    calls: AtomicU32,
    delay: Duration,
}

impl CountingGenerator {
    fn new() -> Arc<Self> {
        Self::slow(Duration::ZERO)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for CountingGenerator {
    fn name(&self) -> &str {
        "counting"
    }

    async fn generate_stream(&self, _category: Category, text: &str) -> Result<GenerateStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let events = vec![
            Ok(GenerateEvent::Text("answer to ".to_string())),
            Ok(GenerateEvent::Text(text.to_string())),
            Ok(GenerateEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Fails every call with a non-transient error.
struct FailingGenerator {
    calls: AtomicU32,
}

#[async_trait]
impl Generator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate_stream(&self, _category: Category, _text: &str) -> Result<GenerateStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MimirError::Generation("model unavailable".into()))
    }
}

/// Yields only whitespace.
struct BlankGenerator;

#[async_trait]
impl Generator for BlankGenerator {
    fn name(&self) -> &str {
        "blank"
    }

    async fn generate_stream(&self, _category: Category, _text: &str) -> Result<GenerateStream> {
        let events = vec![
            Ok(GenerateEvent::Text("  \n".to_string())),
            Ok(GenerateEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Memory store whose inserts always fail.
struct ReadOnlyStore {
    inner: MemoryStore,
}

#[async_trait]
impl DurableStore for ReadOnlyStore {
    fn name(&self) -> &str {
        "read-only"
    }

    async fn find(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>> {
        self.inner.find(key).await
    }

    async fn insert(&self, _payload: &ResolvedPayload) -> Result<ResolvedPayload> {
        Err(MimirError::Store("connection refused".into()))
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }

    async fn keys(&self) -> Result<Vec<ContentKey>> {
        self.inner.keys().await
    }

    async fn record_access(&self, entry: &AccessHistoryEntry) -> Result<()> {
        self.inner.record_access(entry).await
    }

    async fn recent_history(
        &self,
        requester: RequesterId,
        limit: usize,
    ) -> Result<Vec<ResolvedPayload>> {
        self.inner.recent_history(requester, limit).await
    }

    async fn hottest(&self, category: Category, limit: usize) -> Result<Vec<ResolvedPayload>> {
        self.inner.hottest(category, limit).await
    }
}

/// Lease backend that is always unreachable.
struct UnreachableLock;

#[async_trait]
impl LeaseLock for UnreachableLock {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn try_acquire(&self, _key: &ContentKey, _ttl: Duration) -> Result<Acquire> {
        Err(MimirError::Lock("connection reset".into()))
    }

    async fn release(&self, _lease: &LockLease) -> Result<Release> {
        Err(MimirError::Lock("connection reset".into()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fast_lock_config() -> LockConfig {
    LockConfig::new()
        .poll_interval(Duration::from_millis(10))
        .max_attempts(200)
}

async fn resolver_with(
    generator: Arc<dyn Generator>,
    shared: Arc<MemorySharedTier>,
    store: Arc<dyn DurableStore>,
    lock: Arc<dyn LeaseLock>,
) -> Resolver {
    Resolver::builder()
        .generator(generator)
        .shared_tier(shared)
        .store(store)
        .lease_lock(lock)
        .lock_config(fast_lock_config())
        .warmup(WarmupConfig::disabled())
        .without_maintenance()
        .build()
        .await
        .unwrap()
}

fn code(requester: RequesterId, text: &str) -> ResolveRequest {
    ResolveRequest::new(requester, Category::Code, text)
}

// ============================================================================
// Tier walk
// ============================================================================

#[tokio::test]
async fn first_request_generates_and_second_hits_fast_tier() {
    let generator = CountingGenerator::new();
    let shared = Arc::new(MemorySharedTier::new());
    let store = Arc::new(MemoryStore::new());
    let resolver = resolver_with(
        generator.clone(),
        shared.clone(),
        store.clone(),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    let first = resolver.resolve(code(1, "fn main() {}")).await.unwrap();
    assert_eq!(first.source, Source::Generated);
    assert_eq!(first.text(), "answer to fn main() {}");
    assert_eq!(first.payload.owner_record_id, Some(1));
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(shared.len(), 1);
    assert!(resolver.filter().test(&first.payload.key));

    let second = resolver.resolve(code(2, "fn main() {}")).await.unwrap();
    assert_eq!(second.source, Source::Fast);
    assert_eq!(second.payload, first.payload);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn new_instance_hits_shared_tier() {
    let generator = CountingGenerator::new();
    let shared = Arc::new(MemorySharedTier::new());
    let store = Arc::new(MemoryStore::new());

    let a = resolver_with(
        generator.clone(),
        shared.clone(),
        store.clone(),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;
    a.resolve(code(1, "let x = 1;")).await.unwrap();

    // built after the write, so its filter already knows the key
    let b = resolver_with(
        generator.clone(),
        shared,
        store,
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;
    let resolution = b.resolve(code(1, "let x = 1;")).await.unwrap();
    assert_eq!(resolution.source, Source::Shared);

    let again = b.resolve(code(1, "let x = 1;")).await.unwrap();
    assert_eq!(again.source, Source::Fast);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn durable_hit_repopulates_cache_tiers() {
    let generator = CountingGenerator::new();
    let store = Arc::new(MemoryStore::new());

    let a = resolver_with(
        generator.clone(),
        Arc::new(MemorySharedTier::new()),
        store.clone(),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;
    a.resolve(code(1, "SELECT 1")).await.unwrap();

    let shared = Arc::new(MemorySharedTier::new());
    let b = resolver_with(
        generator.clone(),
        shared.clone(),
        store.clone(),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;
    let resolution = b.resolve(code(1, "SELECT 1")).await.unwrap();
    assert_eq!(resolution.source, Source::Durable);
    assert_eq!(shared.len(), 1);

    let again = b.resolve(code(1, "SELECT 1")).await.unwrap();
    assert_eq!(again.source, Source::Fast);
    assert_eq!(generator.calls(), 1);
    assert_eq!(store.visits(&resolution.payload.key), Some(3));
}

#[tokio::test]
async fn categories_do_not_share_answers() {
    let generator = CountingGenerator::new();
    let resolver = resolver_with(
        generator.clone(),
        Arc::new(MemorySharedTier::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    let code = resolver.resolve(code(1, "rust")).await.unwrap();
    let article = resolver
        .resolve(ResolveRequest::new(1, Category::Article, "rust"))
        .await
        .unwrap();
    assert_ne!(code.payload.key, article.payload.key);
    assert_eq!(article.source, Source::Generated);
    assert_eq!(generator.calls(), 2);
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn concurrent_misses_generate_once() {
    let generator = CountingGenerator::slow(Duration::from_millis(50));
    let resolver = resolver_with(
        generator.clone(),
        Arc::new(MemorySharedTier::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    let handles: Vec<_> = (0..8)
        .map(|requester| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve(code(requester, "hot question")).await })
        })
        .collect();

    let mut generated = 0;
    for handle in handles {
        let resolution = handle.await.unwrap().unwrap();
        assert_eq!(resolution.text(), "answer to hot question");
        match resolution.source {
            Source::Generated => generated += 1,
            Source::Peer => {}
            other => panic!("unexpected source {other}"),
        }
    }
    assert_eq!(generated, 1);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn concurrent_misses_across_instances_generate_once() {
    let generator = CountingGenerator::slow(Duration::from_millis(50));
    let shared = Arc::new(MemorySharedTier::new());
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(MemoryLeaseLock::new());

    let a = resolver_with(generator.clone(), shared.clone(), store.clone(), lock.clone()).await;
    let b = resolver_with(generator.clone(), shared, store.clone(), lock).await;

    let (ra, rb) = tokio::join!(a.resolve(code(1, "shared q")), b.resolve(code(2, "shared q")));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.payload, rb.payload);
    let mut sources = [ra.source, rb.source];
    sources.sort_by_key(|s| s.as_str());
    assert_eq!(sources, [Source::Generated, Source::Peer]);
    assert_eq!(generator.calls(), 1);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn held_lease_without_result_times_out() {
    let generator = CountingGenerator::new();
    let lock = Arc::new(MemoryLeaseLock::new());
    let resolver = Resolver::builder()
        .generator(generator.clone())
        .lease_lock(lock.clone())
        .lock_config(
            LockConfig::new()
                .poll_interval(Duration::from_millis(100))
                .max_attempts(3),
        )
        .warmup(WarmupConfig::disabled())
        .without_maintenance()
        .build()
        .await
        .unwrap();

    let request = code(1, "stuck");
    let held = lock
        .try_acquire(&request.key(), Duration::from_secs(60))
        .await
        .unwrap();
    assert!(matches!(held, Acquire::Held(_)));

    let err = resolver.resolve(request).await.unwrap_err();
    assert!(matches!(err, MimirError::ContentionTimeout { attempts: 3, .. }));
    assert!(err.is_retryable());
    assert_eq!(generator.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_generation_keeps_its_lease_under_default_config() {
    // 90s is well inside the default generator timeout
    let generator = CountingGenerator::slow(Duration::from_secs(90));
    let lock = Arc::new(MemoryLeaseLock::new());
    let resolver = Resolver::builder()
        .generator(generator.clone())
        .lease_lock(lock.clone())
        .lock_config(LockConfig::default())
        .warmup(WarmupConfig::disabled())
        .without_maintenance()
        .build()
        .await
        .unwrap();

    let first = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve(code(1, "slow question")).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    let early = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve(code(2, "slow question")).await })
    };
    // past the old 60s lease, before the generation finishes
    tokio::time::sleep(Duration::from_secs(64)).await;
    assert!(lock.is_held(&code(1, "slow question").key()));
    let late = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve(code(3, "slow question")).await })
    };

    let first = first.await.unwrap().unwrap();
    let early = early.await.unwrap().unwrap();
    let late = late.await.unwrap().unwrap();

    assert_eq!(first.source, Source::Generated);
    assert_eq!(early.source, Source::Peer);
    assert_eq!(late.source, Source::Peer);
    assert_eq!(late.payload, first.payload);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_resolve_releases_its_lease() {
    let generator = CountingGenerator::slow(Duration::from_secs(30));
    let lock = Arc::new(MemoryLeaseLock::new());
    let resolver = resolver_with(
        generator.clone(),
        Arc::new(MemorySharedTier::new()),
        Arc::new(MemoryStore::new()),
        lock.clone(),
    )
    .await;

    let request = code(1, "abandoned");
    let key = request.key();
    let abandoned = tokio::time::timeout(Duration::from_secs(1), resolver.resolve(request)).await;
    assert!(abandoned.is_err());
    assert_eq!(generator.calls(), 1);

    // the release runs on a spawned task
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!lock.is_held(&key));

    let retried = resolver.resolve(code(1, "abandoned")).await.unwrap();
    assert_eq!(retried.source, Source::Generated);
    assert_eq!(generator.calls(), 2);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn generator_failure_populates_nothing_and_releases_lease() {
    let generator = Arc::new(FailingGenerator {
        calls: AtomicU32::new(0),
    });
    let shared = Arc::new(MemorySharedTier::new());
    let store = Arc::new(MemoryStore::new());
    let lock = Arc::new(MemoryLeaseLock::new());
    let resolver =
        resolver_with(generator.clone(), shared.clone(), store.clone(), lock.clone()).await;

    let request = code(1, "doomed");
    let key = request.key();
    let err = resolver.resolve(request).await.unwrap_err();
    assert!(matches!(err, MimirError::Generation(_)));

    assert!(shared.is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(!resolver.filter().test(&key));
    assert!(!lock.is_held(&key));

    // a retry reaches the generator again instead of waiting on a stale lease
    resolver.resolve(code(1, "doomed")).await.unwrap_err();
    assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn blank_generation_is_an_error() {
    let shared = Arc::new(MemorySharedTier::new());
    let resolver = resolver_with(
        Arc::new(BlankGenerator),
        shared.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    let err = resolver.resolve(code(1, "anything")).await.unwrap_err();
    assert!(matches!(err, MimirError::EmptyGeneration));
    assert!(shared.is_empty());
}

#[tokio::test]
async fn empty_text_is_rejected_before_generation() {
    let generator = CountingGenerator::new();
    let resolver = resolver_with(
        generator.clone(),
        Arc::new(MemorySharedTier::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    let err = resolver.resolve(code(1, "   ")).await.unwrap_err();
    assert!(matches!(err, MimirError::InvalidInput(_)));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn store_write_failure_still_serves_and_caches() {
    let generator = CountingGenerator::new();
    let shared = Arc::new(MemorySharedTier::new());
    let store = Arc::new(ReadOnlyStore {
        inner: MemoryStore::new(),
    });
    let resolver = resolver_with(
        generator.clone(),
        shared.clone(),
        store,
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    let resolution = resolver.resolve(code(1, "unpersisted")).await.unwrap();
    assert_eq!(resolution.source, Source::Generated);
    assert_eq!(resolution.payload.owner_record_id, None);
    assert_eq!(shared.len(), 1);

    let again = resolver.resolve(code(1, "unpersisted")).await.unwrap();
    assert_eq!(again.source, Source::Fast);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn lease_backend_outage_generates_without_lease() {
    let generator = CountingGenerator::new();
    let resolver = resolver_with(
        generator.clone(),
        Arc::new(MemorySharedTier::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(UnreachableLock),
    )
    .await;

    let resolution = resolver.resolve(code(1, "no redis")).await.unwrap();
    assert_eq!(resolution.source, Source::Generated);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn missing_generator_fails_build() {
    let err = Resolver::builder().build().await.err().unwrap();
    assert!(matches!(err, MimirError::Configuration(_)));
}

// ============================================================================
// Invalidation and history
// ============================================================================

#[tokio::test]
async fn invalidate_falls_back_to_durable_store() {
    let generator = CountingGenerator::new();
    let shared = Arc::new(MemorySharedTier::new());
    let resolver = resolver_with(
        generator.clone(),
        shared.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    resolver.resolve(code(1, "stale")).await.unwrap();
    resolver.invalidate(Category::Code, "stale").await.unwrap();
    assert!(shared.is_empty());

    let resolution = resolver.resolve(code(1, "stale")).await.unwrap();
    assert_eq!(resolution.source, Source::Durable);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn history_lists_requester_answers_newest_first() {
    let resolver = resolver_with(
        CountingGenerator::new(),
        Arc::new(MemorySharedTier::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryLeaseLock::new()),
    )
    .await;

    for text in ["one", "two", "three"] {
        resolver.resolve(code(7, text)).await.unwrap();
    }
    resolver.resolve(code(8, "other")).await.unwrap();
    // a cache hit is still an access
    resolver.resolve(code(7, "one")).await.unwrap();

    let history = resolver.history(7, 3).await.unwrap();
    let texts: Vec<_> = history.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, ["answer to one", "answer to three", "answer to two"]);

    assert!(resolver.history(9, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let resolver = Resolver::builder()
        .generator(CountingGenerator::new())
        .build()
        .await
        .unwrap();
    resolver.shutdown().await;
    resolver.shutdown().await;
}
