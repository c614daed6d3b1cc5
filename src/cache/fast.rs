//! Process-local fast tier.

use moka::future::Cache;

use super::CacheConfig;
use crate::key::ContentKey;
use crate::telemetry;
use crate::types::ResolvedPayload;

/// In-memory payload cache.
///
/// Uses moka's async-friendly LRU + TTL cache, bounded by entry count and a
/// single global time-to-live. Entries are owned clones, so a hit never
/// borrows from the cache.
pub struct FastTier {
    cache: Cache<ContentKey, ResolvedPayload>,
}

impl FastTier {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.fast_max_entries)
            .time_to_live(config.fast_ttl)
            .build();
        Self { cache }
    }

    /// Look up a payload. Emits hit/miss metrics.
    pub async fn get(&self, key: &ContentKey) -> Option<ResolvedPayload> {
        match self.cache.get(key).await {
            Some(payload) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "fast").increment(1);
                Some(payload)
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "tier" => "fast").increment(1);
                None
            }
        }
    }

    pub async fn insert(&self, payload: ResolvedPayload) {
        self.cache.insert(payload.key.clone(), payload).await;
    }

    pub async fn invalidate(&self, key: &ContentKey) {
        self.cache.invalidate(key).await;
    }

    /// Approximate entry count (moka applies writes lazily).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
