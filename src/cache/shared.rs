//! Cross-process shared tier.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::key::ContentKey;
use crate::types::ResolvedPayload;
use crate::{Result, sync};

/// Key-value store shared by every resolver instance, with per-entry TTL.
///
/// Entries are stored under [`ContentKey::payload_key`]. Implementations
/// report backend failures as [`MimirError::SharedTier`](crate::MimirError::SharedTier);
/// the tiered cache turns those into misses.
#[async_trait]
pub trait SharedTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>>;

    async fn set(&self, payload: &ResolvedPayload, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &ContentKey) -> Result<()>;
}

/// Shared tier held in process memory.
///
/// Wrap in an `Arc` and hand the same instance to several resolvers to model
/// multiple processes sharing one store. Expiry follows the tokio clock, so
/// paused-time tests can step over TTLs.
#[derive(Default)]
pub struct MemorySharedTier {
    entries: Mutex<HashMap<String, (ResolvedPayload, Instant)>>,
}

impl MemorySharedTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        sync::lock(&self.entries, "shared.len")
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedTier for MemorySharedTier {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>> {
        let mut entries = sync::lock(&self.entries, "shared.get");
        let slot = key.payload_key();
        match entries.get(&slot) {
            Some((payload, expires)) if *expires > Instant::now() => Ok(Some(payload.clone())),
            Some(_) => {
                entries.remove(&slot);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, payload: &ResolvedPayload, ttl: Duration) -> Result<()> {
        sync::lock(&self.entries, "shared.set").insert(
            payload.key.payload_key(),
            (payload.clone(), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &ContentKey) -> Result<()> {
        sync::lock(&self.entries, "shared.delete").remove(&key.payload_key());
        Ok(())
    }
}
