//! In-process lease lock.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Acquire, LeaseLock, LockLease, Release};
use crate::key::ContentKey;
use crate::{Result, sync};

/// Lease lock held in process memory.
///
/// Share one instance (via `Arc`) between resolvers to model several
/// processes contending on a single backend. Expiry follows the tokio clock.
#[derive(Default)]
pub struct MemoryLeaseLock {
    leases: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLeaseLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live lease exists for `key`.
    pub fn is_held(&self, key: &ContentKey) -> bool {
        sync::lock(&self.leases, "lock.is_held")
            .get(&key.lock_key())
            .is_some_and(|(_, expires)| *expires > Instant::now())
    }
}

#[async_trait]
impl LeaseLock for MemoryLeaseLock {
    fn name(&self) -> &str {
        "memory"
    }

    async fn try_acquire(&self, key: &ContentKey, ttl: Duration) -> Result<Acquire> {
        let mut leases = sync::lock(&self.leases, "lock.try_acquire");
        let slot = key.lock_key();
        let now = Instant::now();
        if let Some((_, expires)) = leases.get(&slot)
            && *expires > now
        {
            return Ok(Acquire::Busy);
        }
        let lease = LockLease::issue(key, ttl);
        leases.insert(slot, (lease.token.clone(), now + ttl));
        Ok(Acquire::Held(lease))
    }

    async fn release(&self, lease: &LockLease) -> Result<Release> {
        let mut leases = sync::lock(&self.leases, "lock.release");
        let slot = lease.key.lock_key();
        let now = Instant::now();
        match leases.get(&slot) {
            Some((token, expires)) if *token == lease.token && *expires > now => {
                leases.remove(&slot);
                Ok(Release::Released)
            }
            _ => Ok(Release::NotHolder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn key() -> ContentKey {
        ContentKey::derive(Category::Code, "contended")
    }

    #[tokio::test]
    async fn second_acquire_is_busy() {
        let lock = MemoryLeaseLock::new();
        let ttl = Duration::from_secs(5);
        assert!(matches!(lock.try_acquire(&key(), ttl).await.unwrap(), Acquire::Held(_)));
        assert_eq!(lock.try_acquire(&key(), ttl).await.unwrap(), Acquire::Busy);
    }

    #[tokio::test]
    async fn release_frees_the_key() {
        let lock = MemoryLeaseLock::new();
        let ttl = Duration::from_secs(5);
        let Acquire::Held(lease) = lock.try_acquire(&key(), ttl).await.unwrap() else {
            panic!("expected lease");
        };
        assert_eq!(lock.release(&lease).await.unwrap(), Release::Released);
        assert!(!lock.is_held(&key()));
        assert!(matches!(lock.try_acquire(&key(), ttl).await.unwrap(), Acquire::Held(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_holder_cannot_release_new_lease() {
        let lock = MemoryLeaseLock::new();
        let ttl = Duration::from_secs(5);
        let Acquire::Held(stale) = lock.try_acquire(&key(), ttl).await.unwrap() else {
            panic!("expected lease");
        };

        tokio::time::advance(Duration::from_secs(6)).await;
        let Acquire::Held(fresh) = lock.try_acquire(&key(), ttl).await.unwrap() else {
            panic!("expired lease should be re-acquirable");
        };
        assert_ne!(stale.token, fresh.token);

        assert_eq!(lock.release(&stale).await.unwrap(), Release::NotHolder);
        assert!(lock.is_held(&key()));
        assert_eq!(lock.release(&fresh).await.unwrap(), Release::Released);
    }
}
