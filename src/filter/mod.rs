//! Capacity-managed bloom filter.
//!
//! Answers "has this key possibly been generated before?" with no false
//! negatives. The filter is sized from the durable store at load time and
//! rebuilt in the background when it ages out or fills past its threshold.
//!
//! # Architecture
//!
//! ```text
//! insert ──► RwLock<FilterState> ──► (threshold crossed) ──► Notify
//!                   ▲                                          │
//!                   │ swap                                     ▼
//!            rebuild_now() ◄──── maintenance task ◄──── interval tick
//!                   │
//!                   └── DurableStore::count / keys
//! ```
//!
//! Inserts that land while a rebuild is reading the store are recorded in a
//! pending list and replayed into the new filter before it is swapped in.

mod bloom;

pub use bloom::{BloomFilter, MAX_FP_RATE, optimal_bits, optimal_hashes};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::key::ContentKey;
use crate::store::DurableStore;
use crate::{Result, sync, telemetry};

/// Sizing and rebuild policy for the capacity filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    /// Minimum number of items the filter is sized for.
    pub expected_items: u64,
    /// Target false-positive rate.
    pub fp_rate: f64,
    /// Maximum age of a filter before it is rebuilt.
    pub rebuild_interval: Duration,
    /// Fraction of capacity that triggers a rebuild.
    pub rebuild_threshold: f64,
    /// How often the maintenance task checks the rebuild policy.
    pub check_interval: Duration,
    /// Headroom multiplier applied to the store's item count on rebuild.
    pub growth_factor: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_items: 100_000,
            fp_rate: 0.01,
            rebuild_interval: Duration::from_secs(24 * 3600),
            rebuild_threshold: 0.8,
            check_interval: Duration::from_secs(3600),
            growth_factor: 1.5,
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected_items(mut self, n: u64) -> Self {
        self.expected_items = n;
        self
    }

    pub fn fp_rate(mut self, p: f64) -> Self {
        self.fp_rate = p;
        self
    }

    pub fn rebuild_interval(mut self, interval: Duration) -> Self {
        self.rebuild_interval = interval;
        self
    }

    pub fn rebuild_threshold(mut self, threshold: f64) -> Self {
        self.rebuild_threshold = threshold;
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Capacity to allocate for a store currently holding `count` items.
    pub fn capacity_for(&self, count: u64) -> u64 {
        let grown = (count as f64 * self.growth_factor).ceil() as u64;
        self.expected_items.max(grown).max(1)
    }
}

/// Point-in-time view of the filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterStats {
    pub bits: u64,
    pub hashes: u32,
    pub capacity: u64,
    pub estimated_items: f64,
    pub fp_rate: f64,
    pub last_rebuild: DateTime<Utc>,
    pub rebuilds: u64,
    pub rebuilding: bool,
}

struct FilterState {
    bloom: BloomFilter,
    /// `Some` while a rebuild is reading the store.
    pending: Option<Vec<ContentKey>>,
    built_at: Instant,
    built_at_utc: DateTime<Utc>,
    rebuilds: u64,
}

struct FilterInner {
    state: RwLock<FilterState>,
    store: Arc<dyn DurableStore>,
    config: FilterConfig,
    rebuilding: AtomicBool,
    wake: Notify,
}

/// Shared handle to the capacity filter. Cheap to clone.
#[derive(Clone)]
pub struct CapacityFilter {
    inner: Arc<FilterInner>,
}

impl std::fmt::Debug for CapacityFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityFilter")
            .field("stats", &self.stats())
            .finish()
    }
}

impl CapacityFilter {
    /// Build the initial filter from every key in `store`.
    pub async fn load(store: Arc<dyn DurableStore>, config: FilterConfig) -> Result<Self> {
        let bloom = populate(store.as_ref(), &config).await?;
        info!(
            store = store.name(),
            capacity = bloom.capacity(),
            bits = bloom.bits(),
            hashes = bloom.hashes(),
            "capacity filter loaded"
        );
        Ok(Self {
            inner: Arc::new(FilterInner {
                state: RwLock::new(FilterState {
                    bloom,
                    pending: None,
                    built_at: Instant::now(),
                    built_at_utc: Utc::now(),
                    rebuilds: 0,
                }),
                store,
                config,
                rebuilding: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        })
    }

    /// `false` means the key has definitely never been inserted.
    pub fn test(&self, key: &ContentKey) -> bool {
        let present = sync::read(&self.inner.state, "filter.test")
            .bloom
            .contains(key.as_str());
        if !present {
            metrics::counter!(telemetry::FILTER_NEGATIVES_TOTAL).increment(1);
        }
        present
    }

    /// Record a key. Wakes the maintenance task if occupancy crosses the threshold.
    pub fn insert(&self, key: &ContentKey) {
        let over_threshold = {
            let mut state = sync::write(&self.inner.state, "filter.insert");
            state.bloom.insert(key.as_str());
            if let Some(pending) = state.pending.as_mut() {
                pending.push(key.clone());
            }
            self.over_threshold(&state.bloom)
        };
        if over_threshold && !self.inner.rebuilding.load(Ordering::Acquire) {
            self.inner.wake.notify_one();
        }
    }

    pub fn stats(&self) -> FilterStats {
        let state = sync::read(&self.inner.state, "filter.stats");
        FilterStats {
            bits: state.bloom.bits(),
            hashes: state.bloom.hashes(),
            capacity: state.bloom.capacity(),
            estimated_items: state.bloom.estimated_items(),
            fp_rate: state.bloom.fp_rate(),
            last_rebuild: state.built_at_utc,
            rebuilds: state.rebuilds,
            rebuilding: self.inner.rebuilding.load(Ordering::Acquire),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.inner.config
    }

    /// Whether the age or occupancy policy calls for a rebuild.
    pub fn needs_rebuild(&self) -> bool {
        let state = sync::read(&self.inner.state, "filter.needs_rebuild");
        state.built_at.elapsed() >= self.inner.config.rebuild_interval
            || self.over_threshold(&state.bloom)
    }

    /// Rebuild the filter from the durable store and swap it in.
    ///
    /// If a rebuild is already running this returns the current stats
    /// without starting another. On store failure the old filter stays.
    pub async fn rebuild_now(&self) -> Result<FilterStats> {
        if self.inner.rebuilding.swap(true, Ordering::AcqRel) {
            debug!("filter rebuild already in progress");
            return Ok(self.stats());
        }
        let guard = RebuildGuard { inner: &self.inner };
        sync::write(&self.inner.state, "filter.rebuild.begin").pending = Some(Vec::new());

        let mut fresh = match populate(self.inner.store.as_ref(), &self.inner.config).await {
            Ok(bloom) => bloom,
            Err(e) => {
                warn!(error = %e, "filter rebuild failed, keeping current filter");
                metrics::counter!(telemetry::FILTER_REBUILDS_TOTAL, "status" => "error")
                    .increment(1);
                return Err(e);
            }
        };

        {
            let mut state = sync::write(&self.inner.state, "filter.rebuild.swap");
            let replayed = state.pending.take().unwrap_or_default();
            for key in &replayed {
                fresh.insert(key.as_str());
            }
            info!(
                capacity = fresh.capacity(),
                bits = fresh.bits(),
                hashes = fresh.hashes(),
                replayed = replayed.len(),
                previous_capacity = state.bloom.capacity(),
                "capacity filter rebuilt"
            );
            state.bloom = fresh;
            state.built_at = Instant::now();
            state.built_at_utc = Utc::now();
            state.rebuilds += 1;
        }
        drop(guard);
        metrics::counter!(telemetry::FILTER_REBUILDS_TOTAL, "status" => "ok").increment(1);
        Ok(self.stats())
    }

    /// Start the background maintenance task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let filter = self.clone();
        let period = self.inner.config.check_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {}
                    _ = filter.inner.wake.notified() => {}
                }
                if filter.needs_rebuild() {
                    // failure already logged and counted; next tick retries
                    let _ = filter.rebuild_now().await;
                }
            }
            debug!("filter maintenance stopped");
        });

        MaintenanceHandle { shutdown, task }
    }

    fn over_threshold(&self, bloom: &BloomFilter) -> bool {
        bloom.estimated_items() >= self.inner.config.rebuild_threshold * bloom.capacity() as f64
    }
}

/// Handle to the background maintenance task.
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Stop the task and wait for it to exit. An in-flight rebuild finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "filter maintenance task ended abnormally");
        }
    }
}

/// Clears the rebuild flag and pending list even if the rebuild future is dropped.
struct RebuildGuard<'a> {
    inner: &'a FilterInner,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        sync::write(&self.inner.state, "filter.rebuild.end").pending = None;
        self.inner.rebuilding.store(false, Ordering::Release);
    }
}

async fn populate(store: &dyn DurableStore, config: &FilterConfig) -> Result<BloomFilter> {
    let count = store.count().await?;
    let keys = store.keys().await?;
    let mut bloom = BloomFilter::with_capacity(config.capacity_for(count), config.fp_rate);
    for key in &keys {
        bloom.insert(key.as_str());
    }
    Ok(bloom)
}
