//! Lease-based mutual exclusion keyed by content key.
//!
//! A lease is a set-if-absent entry under [`ContentKey::lock_key`] holding a
//! random holder token, with an expiry so a crashed holder cannot wedge a key
//! forever. Release is compare-and-delete on the token: once a lease has
//! expired and been taken by someone else, the stale holder's release is a
//! no-op ([`Release::NotHolder`]).

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryLeaseLock;
#[cfg(feature = "redis")]
pub use self::redis::RedisLeaseLock;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;
use crate::key::ContentKey;

/// Default lease lifetime. Longer than
/// [`DEFAULT_GENERATION_TIMEOUT_SECS`](crate::generator::DEFAULT_GENERATION_TIMEOUT_SECS),
/// so a generation that is still within its timeout never loses its lease.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(150);

/// Lease timing and waiter polling policy.
///
/// The lease must outlive the generator timeout, otherwise a second holder
/// can take an expired lease and generate the same key concurrently. Waiters
/// should poll for at least as long as a lease can be held.
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    /// Lease lifetime. Must exceed the generator timeout.
    pub lease_ttl: Duration,
    /// Delay between a waiter's probes of the cache tiers.
    pub poll_interval: Duration,
    /// Probes before a waiter gives up with `ContentionTimeout`.
    pub max_attempts: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        // 250ms x 640 = 160s of waiting, covering a full lease
        Self {
            lease_ttl: DEFAULT_LEASE_TTL,
            poll_interval: Duration::from_millis(250),
            max_attempts: 640,
        }
    }
}

impl LockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Total time a waiter polls before giving up.
    pub fn wait_budget(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_attempts)
    }
}

/// Proof of holding the lease for `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: ContentKey,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl LockLease {
    /// New lease for `key` with a fresh random token.
    pub fn issue(key: &ContentKey, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            key: key.clone(),
            token: Uuid::new_v4().to_string(),
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

/// Outcome of [`LeaseLock::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquire {
    Held(LockLease),
    Busy,
}

/// Outcome of [`LeaseLock::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    Released,
    /// The lease expired and was dropped or re-acquired by someone else.
    NotHolder,
}

/// Distributed lease lock.
#[async_trait]
pub trait LeaseLock: Send + Sync {
    fn name(&self) -> &str;

    /// Atomically take the lease for `key` if nobody holds it.
    async fn try_acquire(&self, key: &ContentKey, ttl: Duration) -> Result<Acquire>;

    /// Drop the lease if `lease.token` still owns it.
    async fn release(&self, lease: &LockLease) -> Result<Release>;
}
