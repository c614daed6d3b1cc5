//! Durable record store.
//!
//! The store is ground truth: every generated payload is written here, and
//! the cache tiers and capacity filter are rebuilt from it. It also keeps the
//! append-only access history and a per-payload visit counter used to pick
//! the warm set.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use async_trait::async_trait;

use crate::Result;
use crate::key::ContentKey;
use crate::types::{AccessHistoryEntry, Category, RequesterId, ResolvedPayload};

/// Default number of entries returned by history queries.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Permanent payload storage plus access history.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    async fn find(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>>;

    /// Persist a payload and return it with `owner_record_id` set.
    ///
    /// Payloads are immutable per key: if the key already exists the stored
    /// row is returned unchanged.
    async fn insert(&self, payload: &ResolvedPayload) -> Result<ResolvedPayload>;

    /// Number of stored payloads.
    async fn count(&self) -> Result<u64>;

    /// Every stored key. Used to (re)build the capacity filter.
    async fn keys(&self) -> Result<Vec<ContentKey>>;

    /// Append a history row and bump the payload's visit counter.
    async fn record_access(&self, entry: &AccessHistoryEntry) -> Result<()>;

    /// Most recent payloads resolved by `requester`, newest first.
    async fn recent_history(
        &self,
        requester: RequesterId,
        limit: usize,
    ) -> Result<Vec<ResolvedPayload>>;

    /// Most visited payloads of `category`, hottest first.
    async fn hottest(&self, category: Category, limit: usize) -> Result<Vec<ResolvedPayload>>;
}
