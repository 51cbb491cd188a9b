//! tiercache - Two-tier caching library
//!
//! This library composes a fast in-process byte cache with a remote
//! Redis-compatible store into a single cache:
//! - Local tier: in-memory Moka cache (fastest, per-process)
//! - Remote tier: Redis (shared across instances)
//!
//! The cache supports:
//! - Local-first reads with promotion of remote bytes into the local tier
//! - Per-tier TTLs, with optional stale serving plus background refresh
//! - Single-flight coalescing: one compute per key, shared by all callers
//! - msgpack payloads with threshold-based zstd compression
//! - Stale fallback masking remote failures, and read retries
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tiercache::{Cache, CacheConfig, Item, MokaLocalCache, RedisRemoteCache};
//!
//! #[derive(Clone, serde::Serialize, serde::Deserialize)]
//! struct User {
//!     name: String,
//!     visits: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = redis::Client::open("redis://127.0.0.1/")?;
//!     let cache = Cache::new(CacheConfig {
//!         remote: Some(Arc::new(RedisRemoteCache::new(client).await?)),
//!         local: Some(Arc::new(MokaLocalCache::new(100 << 20))), // 100 MB
//!         local_ttl: Duration::from_secs(60),
//!         local_store_ttl: Duration::from_secs(300),
//!         ..CacheConfig::default()
//!     });
//!
//!     cache
//!         .set(
//!             &Item::new("user:42")
//!                 .value(User { name: "mia".to_owned(), visits: 1 })
//!                 .ttl(Duration::from_secs(3600)),
//!         )
//!         .await?;
//!
//!     if let Some(user) = cache.get::<User>("user:42").await? {
//!         println!("{} has visited {} times", user.name, user.visits);
//!     }
//!
//!     // Compute-or-cache: the callback runs at most once per key at a time,
//!     // concurrent callers share the result.
//!     let user = cache
//!         .once(Item::new("user:7").compute(|| async {
//!             Ok(User { name: "noor".to_owned(), visits: 0 })
//!         }))
//!         .await?;
//!     # let _ = user;
//!
//!     Ok(())
//! }
//! ```

mod cache;
mod clock;
mod codec;
mod config;
mod error;
mod local;
mod remote;
mod single_flight;
mod stats;

pub use cache::{Cache, Cacheable, Compute, DEFAULT_TTL, Item};
pub use clock::{Clock, SystemClock};
pub use config::CacheConfig;
pub use error::{BoxError, CacheError};
pub use local::{LocalCache, MokaLocalCache};
pub use remote::{RedisRemoteCache, RemoteCache};
pub use stats::Stats;

// Re-export async_trait for convenience when implementing RemoteCache.
pub use async_trait::async_trait;
