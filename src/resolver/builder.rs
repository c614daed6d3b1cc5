//! Builder for configuring resolver instances

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::{DEFAULT_STREAM_BUFFER, Resolver, ResolverInner};
use crate::cache::{CacheConfig, MemorySharedTier, SharedTier, TieredCache};
use crate::filter::{CapacityFilter, FilterConfig};
use crate::generator::{Generator, RetryConfig, RetryingGenerator};
use crate::lock::{LeaseLock, LockConfig, MemoryLeaseLock};
use crate::store::{DurableStore, MemoryStore};
use crate::warmup::{WarmupConfig, warm_up};
use crate::{MimirError, Result};

/// Builder for [`Resolver`].
///
/// Only the generator is required. Unset backends default to in-memory
/// implementations, which suits tests and single-process deployments.
///
/// ```rust,ignore
/// let resolver = Resolver::builder()
///     .generator(Arc::new(LlmGenerator::new(config)?))
///     .shared_tier(Arc::new(RedisSharedTier::connect(url).await?))
///     .lease_lock(Arc::new(RedisLeaseLock::connect(url).await?))
///     .store(Arc::new(PgStore::connect(db_url, 10).await?))
///     .build()
///     .await?;
/// ```
pub struct ResolverBuilder {
    generator: Option<Arc<dyn Generator>>,
    shared: Option<Arc<dyn SharedTier>>,
    store: Option<Arc<dyn DurableStore>>,
    lock: Option<Arc<dyn LeaseLock>>,
    cache_config: CacheConfig,
    filter_config: FilterConfig,
    lock_config: LockConfig,
    retry_config: Option<RetryConfig>,
    warmup: WarmupConfig,
    stream_buffer: usize,
    maintenance: bool,
}

impl Default for ResolverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverBuilder {
    pub fn new() -> Self {
        Self {
            generator: None,
            shared: None,
            store: None,
            lock: None,
            cache_config: CacheConfig::default(),
            filter_config: FilterConfig::default(),
            lock_config: LockConfig::default(),
            retry_config: None,
            warmup: WarmupConfig::default(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            maintenance: true,
        }
    }

    /// The generation backend. Required.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn shared_tier(mut self, shared: Arc<dyn SharedTier>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn lease_lock(mut self, lock: Arc<dyn LeaseLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    pub fn filter_config(mut self, config: FilterConfig) -> Self {
        self.filter_config = config;
        self
    }

    pub fn lock_config(mut self, config: LockConfig) -> Self {
        self.lock_config = config;
        self
    }

    /// Wrap the generator in a [`RetryingGenerator`].
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    pub fn warmup(mut self, config: WarmupConfig) -> Self {
        self.warmup = config;
        self
    }

    /// Events buffered between a streamed resolution and its reader.
    pub fn stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size;
        self
    }

    /// Skip spawning the filter maintenance task (rebuilds then only happen
    /// via [`CapacityFilter::rebuild_now`]).
    pub fn without_maintenance(mut self) -> Self {
        self.maintenance = false;
        self
    }

    /// Load the filter from the store, warm the caches and start maintenance.
    ///
    /// Must be awaited inside a tokio runtime. Warm-up failures are logged
    /// and do not fail the build; a filter load failure does.
    pub async fn build(self) -> Result<Resolver> {
        let generator = self.generator.ok_or_else(|| {
            MimirError::Configuration("resolver requires a generator".into())
        })?;
        let generator: Arc<dyn Generator> = match self.retry_config {
            Some(config) => Arc::new(RetryingGenerator::new(generator, config)),
            None => generator,
        };
        let store: Arc<dyn DurableStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let shared: Arc<dyn SharedTier> = match self.shared {
            Some(shared) => shared,
            None => Arc::new(MemorySharedTier::new()),
        };
        let lock: Arc<dyn LeaseLock> = match self.lock {
            Some(lock) => lock,
            None => Arc::new(MemoryLeaseLock::new()),
        };

        let filter = CapacityFilter::load(Arc::clone(&store), self.filter_config).await?;
        let cache = TieredCache::new(shared, self.cache_config);

        if let Err(e) = warm_up(store.as_ref(), &cache, &self.warmup).await {
            warn!(error = %e, "continuing with partially warmed caches");
        }

        let maintenance = self.maintenance.then(|| filter.spawn_maintenance());

        info!(
            generator = generator.name(),
            store = store.name(),
            lock = lock.name(),
            "resolver ready"
        );

        Ok(Resolver {
            inner: Arc::new(ResolverInner {
                cache,
                store,
                lock,
                generator,
                filter,
                lock_config: self.lock_config,
                warmup: self.warmup,
                stream_buffer: self.stream_buffer,
                maintenance: Mutex::new(maintenance),
            }),
        })
    }
}
