//! Redis lease lock: `SET NX PX` to acquire, a compare-and-delete script to release.

use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;

use super::{Acquire, LeaseLock, LockLease, Release};
use crate::key::ContentKey;
use crate::{MimirError, Result};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

fn lock_error(err: redis::RedisError) -> MimirError {
    MimirError::Lock(err.to_string())
}

/// Lease lock backed by Redis.
#[derive(Clone)]
pub struct RedisLeaseLock {
    conn: ConnectionManager,
    release: Script,
}

impl RedisLeaseLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE_SCRIPT),
        }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(lock_error)?;
        let conn = ConnectionManager::new(client).await.map_err(lock_error)?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl LeaseLock for RedisLeaseLock {
    fn name(&self) -> &str {
        "redis"
    }

    async fn try_acquire(&self, key: &ContentKey, ttl: Duration) -> Result<Acquire> {
        let lease = LockLease::issue(key, ttl);
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.lock_key())
            .arg(&lease.token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await
            .map_err(lock_error)?;
        Ok(match reply {
            Some(_) => Acquire::Held(lease),
            None => Acquire::Busy,
        })
    }

    async fn release(&self, lease: &LockLease) -> Result<Release> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .release
            .key(lease.key.lock_key())
            .arg(&lease.token)
            .invoke_async(&mut conn)
            .await
            .map_err(lock_error)?;
        Ok(if deleted == 1 {
            Release::Released
        } else {
            Release::NotHolder
        })
    }
}
