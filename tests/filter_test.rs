//! Tests for capacity filter loading, rebuilds and background maintenance.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use mimir::{
    AccessHistoryEntry, CapacityFilter, Category, ContentKey, DurableStore, FilterConfig,
    MemoryStore, MimirError, RequesterId, ResolvedPayload, Result,
};

// ============================================================================
// Store wrapper
// ============================================================================

/// Memory store whose key listing can be slowed down or made to fail.
struct FlakyStore {
    inner: MemoryStore,
    fail: AtomicBool,
    delay: Duration,
}

impl FlakyStore {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            fail: AtomicBool::new(false),
            delay,
        })
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn find(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>> {
        self.inner.find(key).await
    }

    async fn insert(&self, payload: &ResolvedPayload) -> Result<ResolvedPayload> {
        self.inner.insert(payload).await
    }

    async fn count(&self) -> Result<u64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MimirError::Store("connection refused".into()));
        }
        self.inner.count().await
    }

    async fn keys(&self) -> Result<Vec<ContentKey>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
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

// ============================================================================
// Helpers
// ============================================================================

fn key(i: usize) -> ContentKey {
    ContentKey::derive(Category::Code, &format!("question {i}"))
}

async fn seed(store: &dyn DurableStore, range: std::ops::Range<usize>) {
    for i in range {
        let payload = ResolvedPayload::new(key(i), Category::Code, format!("answer {i}"));
        store.insert(&payload).await.unwrap();
    }
}

fn small_config() -> FilterConfig {
    FilterConfig::new()
        .expected_items(100)
        .fp_rate(0.01)
        .growth_factor(1.5)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn load_contains_every_stored_key() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), 0..50).await;

    let filter = CapacityFilter::load(store, small_config()).await.unwrap();
    for i in 0..50 {
        assert!(filter.test(&key(i)), "false negative for key {i}");
    }

    let stats = filter.stats();
    assert_eq!(stats.capacity, 100);
    assert_eq!(stats.rebuilds, 0);
    assert!(!stats.rebuilding);
}

#[tokio::test]
async fn rebuild_grows_capacity_with_the_store() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), 0..300).await;

    let filter = CapacityFilter::load(store.clone(), small_config()).await.unwrap();
    assert_eq!(filter.stats().capacity, 450);

    seed(store.as_ref(), 300..800).await;
    let stats = filter.rebuild_now().await.unwrap();
    assert_eq!(stats.capacity, 1200);
    assert_eq!(stats.rebuilds, 1);
    for i in 0..800 {
        assert!(filter.test(&key(i)));
    }
}

#[tokio::test]
async fn inserted_keys_survive_until_rebuild_reads_them_back() {
    let store = Arc::new(MemoryStore::new());
    let filter = CapacityFilter::load(store.clone(), small_config()).await.unwrap();

    let fresh = key(7);
    assert!(!filter.test(&fresh));
    filter.insert(&fresh);
    assert!(filter.test(&fresh));

    seed(store.as_ref(), 7..8).await;
    filter.rebuild_now().await.unwrap();
    assert!(filter.test(&fresh));
}

#[tokio::test]
async fn failed_rebuild_keeps_current_filter() {
    let store = FlakyStore::new(Duration::ZERO);
    seed(store.as_ref(), 0..20).await;
    let filter = CapacityFilter::load(store.clone(), small_config()).await.unwrap();

    store.fail.store(true, Ordering::SeqCst);
    let err = filter.rebuild_now().await.unwrap_err();
    assert!(matches!(err, MimirError::Store(_)));

    let stats = filter.stats();
    assert_eq!(stats.rebuilds, 0);
    assert!(!stats.rebuilding);
    for i in 0..20 {
        assert!(filter.test(&key(i)));
    }

    store.fail.store(false, Ordering::SeqCst);
    assert_eq!(filter.rebuild_now().await.unwrap().rebuilds, 1);
}

#[tokio::test(start_paused = true)]
async fn inserts_during_rebuild_are_replayed() {
    let store = FlakyStore::new(Duration::from_secs(1));
    seed(store.as_ref(), 0..10).await;
    let filter = CapacityFilter::load(store.clone(), small_config()).await.unwrap();

    let rebuild = tokio::spawn({
        let filter = filter.clone();
        async move { filter.rebuild_now().await }
    });
    while !filter.stats().rebuilding {
        tokio::task::yield_now().await;
    }

    // never written to the store, so only the replay can carry it over
    let late = key(99);
    filter.insert(&late);

    // a second caller does not start a parallel rebuild
    let concurrent = filter.rebuild_now().await.unwrap();
    assert!(concurrent.rebuilding);
    assert_eq!(concurrent.rebuilds, 0);

    let stats = rebuild.await.unwrap().unwrap();
    assert_eq!(stats.rebuilds, 1);
    assert!(!stats.rebuilding);
    assert!(filter.test(&late));
    assert!(filter.test(&key(3)));
}

#[tokio::test]
async fn filling_past_threshold_requests_rebuild() {
    let store = Arc::new(MemoryStore::new());
    let config = small_config().rebuild_threshold(0.5);
    let filter = CapacityFilter::load(store, config).await.unwrap();
    assert!(!filter.needs_rebuild());

    for i in 0..60 {
        filter.insert(&key(i));
    }
    assert!(filter.needs_rebuild());
}

#[tokio::test(start_paused = true)]
async fn maintenance_rebuilds_aged_filter_and_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    seed(store.as_ref(), 0..5).await;
    let config = small_config()
        .rebuild_interval(Duration::from_secs(10))
        .check_interval(Duration::from_secs(1));
    let filter = CapacityFilter::load(store, config).await.unwrap();

    let handle = filter.spawn_maintenance();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(filter.stats().rebuilds, 0);

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(filter.stats().rebuilds, 1);

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(filter.stats().rebuilds, 1);
}

#[tokio::test(start_paused = true)]
async fn maintenance_wakes_when_threshold_crossed() {
    let store = Arc::new(MemoryStore::new());
    let config = small_config()
        .rebuild_threshold(0.5)
        .check_interval(Duration::from_secs(3600));
    let filter = CapacityFilter::load(store.clone(), config).await.unwrap();
    let handle = filter.spawn_maintenance();

    seed(store.as_ref(), 0..120).await;
    for i in 0..120 {
        filter.insert(&key(i));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    let stats = filter.stats();
    assert_eq!(stats.rebuilds, 1);
    assert_eq!(stats.capacity, 180);
    handle.shutdown().await;
}
