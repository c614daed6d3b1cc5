//! Redis-backed shared tier.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::shared::SharedTier;
use crate::Result;
use crate::key::ContentKey;
use crate::types::ResolvedPayload;

/// Shared tier storing payloads as JSON strings with `SET EX`.
#[derive(Clone)]
pub struct RedisSharedTier {
    conn: ConnectionManager,
}

impl RedisSharedTier {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl SharedTier for RedisSharedTier {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &ContentKey) -> Result<Option<ResolvedPayload>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.payload_key()).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(Into::into))
            .transpose()
    }

    async fn set(&self, payload: &ResolvedPayload, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(payload)?;
        let () = conn
            .set_ex(payload.key.payload_key(), json, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &ContentKey) -> Result<()> {
        let mut conn = self.conn.clone();
        let () = conn.del(key.payload_key()).await?;
        Ok(())
    }
}
