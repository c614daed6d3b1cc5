//! Two-tier payload cache.
//!
//! - [`FastTier`] — process-local moka cache, bounded by entry count and a
//!   single global TTL.
//! - [`SharedTier`] — cross-process store with per-entry TTL. In-memory
//!   ([`MemorySharedTier`]) and Redis (`RedisSharedTier`, feature `redis`)
//!   implementations.
//!
//! [`TieredCache`] coordinates the two. Reads go fast → shared, and a shared
//! hit is copied into the fast tier. Writes go shared → fast. Shared-tier
//! failures are logged, counted, and degrade to a miss or a no-op: the
//! durable store remains the source of truth, so a cache outage only costs
//! latency.

pub mod fast;
#[cfg(feature = "redis")]
pub mod redis;
pub mod shared;

pub use fast::FastTier;
#[cfg(feature = "redis")]
pub use self::redis::RedisSharedTier;
pub use shared::{MemorySharedTier, SharedTier};

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::key::ContentKey;
use crate::telemetry;
use crate::types::{Category, ResolvedPayload, Source};
use crate::Result;

/// Configuration for both cache tiers.
///
/// ```rust
/// # use mimir::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .fast_max_entries(50_000)
///     .code_ttl(Duration::from_secs(12 * 3600));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of fast-tier entries. Default: 10,000.
    pub fast_max_entries: u64,
    /// Fast-tier time-to-live. Default: 1 hour.
    pub fast_ttl: Duration,
    /// Shared-tier TTL for code explanations. Default: 48 hours.
    pub code_ttl: Duration,
    /// Shared-tier TTL for article summaries. Default: 72 hours.
    pub article_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_max_entries: 10_000,
            fast_ttl: Duration::from_secs(3600),
            code_ttl: Category::Code.default_ttl(),
            article_ttl: Category::Article.default_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fast_max_entries(mut self, n: u64) -> Self {
        self.fast_max_entries = n;
        self
    }

    pub fn fast_ttl(mut self, ttl: Duration) -> Self {
        self.fast_ttl = ttl;
        self
    }

    pub fn code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    pub fn article_ttl(mut self, ttl: Duration) -> Self {
        self.article_ttl = ttl;
        self
    }

    /// Shared-tier TTL for payloads of `category`.
    pub fn ttl_for(&self, category: Category) -> Duration {
        match category {
            Category::Code => self.code_ttl,
            Category::Article => self.article_ttl,
        }
    }
}

/// Fast tier in front of a shared tier.
pub struct TieredCache {
    fast: FastTier,
    shared: Arc<dyn SharedTier>,
    config: CacheConfig,
}

impl TieredCache {
    pub fn new(shared: Arc<dyn SharedTier>, config: CacheConfig) -> Self {
        Self {
            fast: FastTier::new(&config),
            shared,
            config,
        }
    }

    /// Look up a payload, fast tier first. Reports which tier answered.
    pub async fn get(&self, key: &ContentKey) -> Option<(ResolvedPayload, Source)> {
        if let Some(payload) = self.fast.get(key).await {
            return Some((payload, Source::Fast));
        }
        let payload = self.get_shared(key).await?;
        self.fast.insert(payload.clone()).await;
        Some((payload, Source::Shared))
    }

    /// Write a payload to both tiers with its category TTL.
    pub async fn set(&self, payload: &ResolvedPayload) {
        self.set_with_ttl(payload, self.config.ttl_for(payload.category))
            .await;
    }

    /// Write a payload to both tiers with an explicit shared-tier TTL.
    pub async fn set_with_ttl(&self, payload: &ResolvedPayload, ttl: Duration) {
        if let Err(e) = self.shared.set(payload, ttl).await {
            warn!(key = %payload.key, tier = self.shared.name(), error = %e, "shared tier write failed");
            metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "shared", "op" => "set")
                .increment(1);
        }
        self.fast.insert(payload.clone()).await;
    }

    /// Remove a payload from both tiers.
    ///
    /// The fast tier is always cleared; a shared-tier failure is returned.
    pub async fn delete(&self, key: &ContentKey) -> Result<()> {
        self.fast.invalidate(key).await;
        self.shared.delete(key).await.inspect_err(|e| {
            warn!(key = %key, tier = self.shared.name(), error = %e, "shared tier delete failed");
            metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "shared", "op" => "delete")
                .increment(1);
        })
    }

    pub fn fast(&self) -> &FastTier {
        &self.fast
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn get_shared(&self, key: &ContentKey) -> Option<ResolvedPayload> {
        match self.shared.get(key).await {
            Ok(Some(payload)) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "shared").increment(1);
                Some(payload)
            }
            Ok(None) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "tier" => "shared").increment(1);
                None
            }
            Err(e) => {
                warn!(key = %key, tier = self.shared.name(), error = %e, "shared tier read failed, treating as miss");
                metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "shared", "op" => "get")
                    .increment(1);
                None
            }
        }
    }
}
