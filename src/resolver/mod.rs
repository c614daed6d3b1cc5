//! The resolution pipeline.
//!
//! [`Resolver`] answers a [`ResolveRequest`] from the cheapest tier that has
//! it and generates at most once per key across every process sharing the
//! same lease backend.
//!
//! # Architecture
//!
//! ```text
//! request ─► key ─► filter ─┬─(maybe)─► fast ─► shared ─► durable ─┬─ hit ─► publish
//!                           │                                     │
//!                           └─(never)──────────────┬──────────────┘ miss
//!                                                  ▼
//!                                          try_acquire(lease)
//!                                   held │                 │ busy
//!                                        ▼                 ▼
//!                          re-probe ─► generate      poll tiers until hit
//!                                        │            or ContentionTimeout
//!                                        ▼
//!                  durable ─► shared ─► fast ─► filter ─► history ─► release
//! ```
//!
//! Infrastructure failures degrade rather than fail: a broken shared tier
//! reads as a miss, a durable write failure still returns and caches the
//! answer, and an unreachable lease backend generates without a lease.
//! Generator failures populate nothing and release the lease.

mod builder;

pub use builder::ResolverBuilder;

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, warn};

use crate::cache::TieredCache;
use crate::filter::{CapacityFilter, MaintenanceHandle};
use crate::generator::{Generator, accumulate, accumulate_relayed};
use crate::key::ContentKey;
use crate::lock::{Acquire, LeaseLock, LockConfig, LockLease, Release};
use crate::store::DurableStore;
use crate::types::{
    AccessHistoryEntry, Category, RequesterId, ResolveEvent, ResolveRequest, Resolution,
    ResolvedPayload, Source,
};
use crate::warmup::{WarmupConfig, WarmupReport, warm_up};
use crate::{MimirError, Result, sync, telemetry};

/// Stream returned by [`Resolver::resolve_stream`].
pub type ResolveStream = Pin<Box<dyn Stream<Item = Result<ResolveEvent>> + Send>>;

type Sink<'a> = Option<&'a mpsc::Sender<Result<ResolveEvent>>>;

/// Default number of events buffered between a streamed resolution and its reader.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Resolution pipeline handle. Cheap to clone; clones share all tiers.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    cache: TieredCache,
    store: Arc<dyn DurableStore>,
    lock: Arc<dyn LeaseLock>,
    generator: Arc<dyn Generator>,
    filter: CapacityFilter,
    lock_config: LockConfig,
    warmup: WarmupConfig,
    stream_buffer: usize,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    /// Resolve a request to a complete answer.
    #[instrument(name = "resolver.resolve", skip(self, request), fields(category = %request.category, requester = request.requester_id))]
    pub async fn resolve(&self, request: ResolveRequest) -> Result<Resolution> {
        self.inner.run(&request, None).await
    }

    /// Resolve a request, relaying generated text as it arrives.
    ///
    /// Yields `Text` fragments then one `Done`, or a single error. Cached
    /// answers arrive as one fragment. The pipeline runs in its own task:
    /// if the stream is dropped mid-generation, the answer is still
    /// persisted and cached for other callers.
    #[instrument(name = "resolver.resolve_stream", skip(self, request), fields(category = %request.category, requester = request.requester_id))]
    pub fn resolve_stream(&self, request: ResolveRequest) -> ResolveStream {
        let (tx, rx) = mpsc::channel(self.inner.stream_buffer.max(1));
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let terminal = match inner.run(&request, Some(&tx)).await {
                Ok(resolution) => {
                    // generated text was already relayed fragment by fragment
                    if resolution.source != Source::Generated
                        && tx
                            .send(Ok(ResolveEvent::Text(resolution.payload.text)))
                            .await
                            .is_err()
                    {
                        return;
                    }
                    Ok(ResolveEvent::Done {
                        key: resolution.payload.key,
                        source: resolution.source,
                    })
                }
                Err(e) => Err(e),
            };
            let _ = tx.send(terminal).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Drop the cached payload for `text` from both cache tiers.
    ///
    /// The durable record and filter membership are untouched, so the next
    /// request is served from the store rather than regenerated.
    pub async fn invalidate(&self, category: Category, text: &str) -> Result<()> {
        self.invalidate_key(&ContentKey::derive(category, text)).await
    }

    #[instrument(name = "resolver.invalidate", skip(self))]
    pub async fn invalidate_key(&self, key: &ContentKey) -> Result<()> {
        self.inner.cache.delete(key).await
    }

    /// Most recent payloads resolved by `requester`, newest first.
    #[instrument(name = "resolver.history", skip(self))]
    pub async fn history(
        &self,
        requester: RequesterId,
        limit: usize,
    ) -> Result<Vec<ResolvedPayload>> {
        self.inner.store.recent_history(requester, limit).await
    }

    /// Reload the hottest payloads into the cache tiers.
    pub async fn warm_up(&self) -> Result<WarmupReport> {
        warm_up(self.inner.store.as_ref(), &self.inner.cache, &self.inner.warmup).await
    }

    pub fn filter(&self) -> &CapacityFilter {
        &self.inner.filter
    }

    pub fn cache(&self) -> &TieredCache {
        &self.inner.cache
    }

    /// Stop the filter maintenance task. Idempotent.
    pub async fn shutdown(&self) {
        let handle = sync::lock(&self.inner.maintenance, "resolver.shutdown").take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }
}

impl ResolverInner {
    async fn run(&self, request: &ResolveRequest, sink: Sink<'_>) -> Result<Resolution> {
        let started = Instant::now();
        let category = request.category.as_str();

        let result = self.pipeline(request, sink).await;

        metrics::histogram!(telemetry::RESOLVE_DURATION_SECONDS, "category" => category)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(resolution) => {
                metrics::counter!(telemetry::RESOLUTIONS_TOTAL,
                    "category" => category,
                    "source" => resolution.source.as_str(),
                )
                .increment(1);
            }
            Err(e) => {
                metrics::counter!(telemetry::RESOLUTION_ERRORS_TOTAL, "category" => category)
                    .increment(1);
                warn!(category, error = %e, "resolution failed");
            }
        }
        result
    }

    async fn pipeline(&self, request: &ResolveRequest, sink: Sink<'_>) -> Result<Resolution> {
        if request.text.trim().is_empty() {
            return Err(MimirError::InvalidInput("request text is empty".into()));
        }
        let key = request.key();

        if self.filter.test(&key) {
            if let Some(resolution) = self.probe(&key).await {
                self.record_access(request.requester_id, &resolution.payload).await;
                return Ok(resolution);
            }
        } else {
            debug!(key = %key, "filter negative, skipping probes");
        }

        let lease = match self.lock.try_acquire(&key, self.lock_config.lease_ttl).await {
            Ok(Acquire::Held(lease)) => Some(LeaseGuard::new(Arc::clone(&self.lock), lease)),
            Ok(Acquire::Busy) => {
                metrics::counter!(telemetry::LOCK_CONTENDED_TOTAL).increment(1);
                debug!(key = %key, "lease busy, waiting for peer");
                return self.wait_for_peer(request, &key).await;
            }
            Err(e) => {
                warn!(key = %key, backend = self.lock.name(), error = %e, "lease backend unavailable, generating without lease");
                metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "lock", "op" => "acquire")
                    .increment(1);
                None
            }
        };

        // a peer may have published between our probe and our acquisition
        let result = match self.probe(&key).await {
            Some(found) => {
                self.filter.insert(&key);
                self.record_access(request.requester_id, &found.payload).await;
                Ok(Resolution {
                    payload: found.payload,
                    source: Source::Peer,
                })
            }
            None => self.generate(request, &key, sink).await,
        };

        if let Some(lease) = lease {
            lease.release().await;
        }
        result
    }

    /// Fast, shared, then durable. A durable hit is written back to the cache tiers.
    async fn probe(&self, key: &ContentKey) -> Option<Resolution> {
        if let Some((payload, source)) = self.cache.get(key).await {
            return Some(Resolution { payload, source });
        }
        match self.store.find(key).await {
            Ok(Some(payload)) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "durable").increment(1);
                self.cache.set(&payload).await;
                Some(Resolution {
                    payload,
                    source: Source::Durable,
                })
            }
            Ok(None) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "tier" => "durable").increment(1);
                None
            }
            Err(e) => {
                warn!(key = %key, store = self.store.name(), error = %e, "durable lookup failed, treating as miss");
                metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "durable", "op" => "find")
                    .increment(1);
                None
            }
        }
    }

    async fn wait_for_peer(
        &self,
        request: &ResolveRequest,
        key: &ContentKey,
    ) -> Result<Resolution> {
        let attempts = self.lock_config.max_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.lock_config.poll_interval).await;
            if let Some(found) = self.probe(key).await {
                debug!(key = %key, attempt, "peer published");
                self.filter.insert(key);
                self.record_access(request.requester_id, &found.payload).await;
                return Ok(Resolution {
                    payload: found.payload,
                    source: Source::Peer,
                });
            }
        }
        metrics::counter!(telemetry::LOCK_TIMEOUTS_TOTAL).increment(1);
        Err(MimirError::ContentionTimeout {
            key: key.to_string(),
            attempts,
        })
    }

    /// Invoke the generator, relay fragments, then publish the full text.
    async fn generate(
        &self,
        request: &ResolveRequest,
        key: &ContentKey,
        sink: Sink<'_>,
    ) -> Result<Resolution> {
        let category = request.category;
        let text = match self.collect(request, sink).await {
            Ok(text) => {
                metrics::counter!(telemetry::GENERATIONS_TOTAL,
                    "category" => category.as_str(),
                    "status" => "ok",
                )
                .increment(1);
                text
            }
            Err(e) => {
                metrics::counter!(telemetry::GENERATIONS_TOTAL,
                    "category" => category.as_str(),
                    "status" => "error",
                )
                .increment(1);
                warn!(key = %key, generator = self.generator.name(), error = %e, "generation failed");
                return Err(e);
            }
        };

        let fresh = ResolvedPayload::new(key.clone(), category, text);
        let payload = match self.store.insert(&fresh).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(key = %key, store = self.store.name(), error = %e, "durable write failed, serving uncommitted answer");
                metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "durable", "op" => "insert")
                    .increment(1);
                fresh
            }
        };
        self.cache.set(&payload).await;
        self.filter.insert(key);
        self.record_access(request.requester_id, &payload).await;

        Ok(Resolution {
            payload,
            source: Source::Generated,
        })
    }

    async fn collect(&self, request: &ResolveRequest, sink: Sink<'_>) -> Result<String> {
        let stream = self
            .generator
            .generate_stream(request.category, &request.text)
            .await?;
        match sink {
            // reader gone: keep generating so peers are served
            Some(tx) => {
                accumulate_relayed(stream, move |chunk| async move {
                    tx.send(Ok(ResolveEvent::Text(chunk))).await.is_ok()
                })
                .await
            }
            None => accumulate(stream).await,
        }
    }

    async fn record_access(&self, requester: RequesterId, payload: &ResolvedPayload) {
        let Some(owner) = payload.owner_record_id else {
            debug!(key = %payload.key, "payload not persisted, skipping history");
            return;
        };
        if let Err(e) = self
            .store
            .record_access(&AccessHistoryEntry::now(requester, owner))
            .await
        {
            warn!(key = %payload.key, requester, error = %e, "history append failed");
            metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "durable", "op" => "record_access")
                .increment(1);
        }
    }
}

/// Held lease that is released on drop if the owner never released it.
struct LeaseGuard {
    lock: Arc<dyn LeaseLock>,
    lease: Option<LockLease>,
}

impl LeaseGuard {
    fn new(lock: Arc<dyn LeaseLock>, lease: LockLease) -> Self {
        Self {
            lock,
            lease: Some(lease),
        }
    }

    async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            release_lease(self.lock.as_ref(), &lease).await;
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        // cancelled mid-pipeline: release in the background instead of waiting out the ttl
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let lock = Arc::clone(&self.lock);
            handle.spawn(async move {
                release_lease(lock.as_ref(), &lease).await;
            });
        }
    }
}

async fn release_lease(lock: &dyn LeaseLock, lease: &LockLease) {
    match lock.release(lease).await {
        Ok(Release::Released) => {}
        Ok(Release::NotHolder) => {
            warn!(key = %lease.key, "lease expired before release; another holder may have generated too");
            metrics::counter!(telemetry::LOCK_STALE_RELEASES_TOTAL).increment(1);
        }
        Err(e) => {
            warn!(key = %lease.key, error = %e, "lease release failed, relying on expiry");
            metrics::counter!(telemetry::TIER_ERRORS_TOTAL, "tier" => "lock", "op" => "release")
                .increment(1);
        }
    }
}
