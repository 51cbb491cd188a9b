//! Remote tier
//!
//! The shared side of the cache: a key/value store behind the [`RemoteCache`]
//! trait, with a Redis implementation over a connection manager. A missing
//! key is reported as `Ok(None)` so the engine can tell absence apart from
//! transport failures, which are eligible for retry.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::BoxError;

/// Remote key/value store capability.
///
/// Deadlines and cancellation follow the usual future semantics: dropping a
/// call's future abandons it, and callers wrap operations in their own
/// timeouts when they need one. The engine adds none of its own.
#[async_trait]
pub trait RemoteCache: Send + Sync + 'static {
    /// Unconditional write. A `ttl` of `None` keeps the key until it is
    /// overwritten or deleted.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), BoxError>;

    /// Write only if the key already exists. Returns whether the write was
    /// applied.
    async fn set_if_exists(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool, BoxError>;

    /// Write only if the key does not exist. Returns whether the write was
    /// applied.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool, BoxError>;

    /// Fetch a value. `Ok(None)` means the key is missing; `Err` is a
    /// transport or server failure.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError>;

    /// Delete keys, returning how many were actually removed.
    async fn del(&self, keys: &[&str]) -> Result<usize, BoxError>;
}

/// [`RemoteCache`] backed by Redis.
///
/// Uses a [`redis::aio::ConnectionManager`], which multiplexes and
/// reconnects on its own; cloning the manager per operation is cheap.
#[derive(Clone)]
pub struct RedisRemoteCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisRemoteCache {
    /// Connect through a new connection manager.
    pub async fn new(client: redis::Client) -> Result<Self, redis::RedisError> {
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    pub fn from_connection(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    fn set_cmd(key: &str, value: &[u8], ttl: Option<Duration>) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd
    }
}

#[async_trait]
impl RemoteCache for RedisRemoteCache {
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), BoxError> {
        let mut conn = self.conn.clone();
        Self::set_cmd(key, value, ttl)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_exists(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool, BoxError> {
        let mut conn = self.conn.clone();
        let mut cmd = Self::set_cmd(key, value, ttl);
        cmd.arg("XX");
        // SET ... XX replies nil when the key was absent.
        let reply = cmd.query_async::<Option<String>>(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<bool, BoxError> {
        let mut conn = self.conn.clone();
        let mut cmd = Self::set_cmd(key, value, ttl);
        cmd.arg("NX");
        let reply = cmd.query_async::<Option<String>>(&mut conn).await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BoxError> {
        let mut conn = self.conn.clone();
        let value = conn.get::<_, Option<Vec<u8>>>(key).await?;
        Ok(value)
    }

    async fn del(&self, keys: &[&str]) -> Result<usize, BoxError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed = conn.del::<_, usize>(keys).await?;
        Ok(removed)
    }
}
