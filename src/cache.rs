//! Two-tier cache engine
//!
//! Composes the local and remote tiers into one cache: writes marshal the
//! value once and push it through both tiers; reads are served local-first,
//! fall back to the remote store with retries, and promote fetched bytes back
//! into the local tier. [`Cache::once`] adds compute-or-cache semantics with
//! single-flight coalescing, so concurrent callers for the same key share one
//! computation.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::codec;
use crate::config::CacheConfig;
use crate::error::{BoxError, CacheError};
use crate::local::{LocalLookup, LocalTier};
use crate::remote::RemoteCache;
use crate::single_flight::Group;
use crate::stats::{Counters, Stats};

/// Remote lifetime applied when an item requests a positive sub-second TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Types that can be cached.
///
/// Blanket-implemented for everything serde can round-trip. `Vec<u8>` and
/// `String` additionally skip serialization and are stored verbatim.
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Compute callback invoked by [`Cache::once`] when no cached bytes exist.
pub type Compute<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, BoxError>> + Send + Sync>;

/// A single cache request.
///
/// Construct with [`Item::new`] and the chainable setters; the guard and
/// skip flags are plain fields, so struct update syntax works too:
///
/// ```
/// use tiercache::Item;
///
/// let item = Item {
///     if_absent: true,
///     ..Item::new("greeting").value("hello".to_owned())
/// };
/// # let _ = item;
/// ```
#[derive(Clone)]
pub struct Item<T> {
    /// Cache key, opaque to the engine.
    pub key: String,

    /// Value to store. When absent and no compute callback is set, an empty
    /// payload is cached.
    pub value: Option<T>,

    /// Remote-tier lifetime. `None` keeps the key until it is overwritten or
    /// deleted; positive sub-second durations are promoted to [`DEFAULT_TTL`].
    pub ttl: Option<Duration>,

    /// Invoked by [`Cache::once`] to produce the value when nothing is
    /// cached. May run again if a cached payload stops decoding.
    pub compute: Option<Compute<T>>,

    /// Write the remote key only if it already exists.
    pub if_exists: bool,

    /// Write the remote key only if it does not already exist.
    pub if_absent: bool,

    /// Bypass the local tier inside [`Cache::once`].
    pub skip_local: bool,
}

impl<T> Item<T> {
    /// New item for `key` with the one-hour default TTL.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            ttl: Some(DEFAULT_TTL),
            compute: None,
            if_exists: false,
            if_absent: false,
            skip_local: false,
        }
    }

    /// Set the value to store.
    pub fn value(mut self, value: T) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the remote-tier lifetime.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Keep the remote key until it is overwritten or deleted.
    pub fn no_expiry(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Set the compute callback for [`Cache::once`].
    pub fn compute<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
    {
        self.compute = Some(Arc::new(move || Box::pin(f())));
        self
    }

    /// TTL as sent to the remote tier: zero collapses to no expiry, positive
    /// sub-second durations are promoted to the one-hour default.
    fn normalized_ttl(&self) -> Option<Duration> {
        match self.ttl {
            None => None,
            Some(ttl) if ttl.is_zero() => None,
            Some(ttl) if ttl < Duration::from_secs(1) => Some(DEFAULT_TTL),
            Some(ttl) => Some(ttl),
        }
    }
}

impl<T: Cacheable> Item<T> {
    /// Produce the value to cache: the compute callback when present,
    /// otherwise the inline value. Either may be absent.
    async fn materialize(&self) -> Result<Option<T>, CacheError> {
        if let Some(compute) = &self.compute {
            return compute().await.map(Some).map_err(CacheError::compute);
        }
        Ok(self.value.clone())
    }
}

/// Result of a write: the marshaled bytes plus the remote tier's verdict,
/// kept separate because [`Cache::once`] serves freshly computed bytes even
/// when the remote write fails.
struct StoreOutcome {
    bytes: Vec<u8>,
    remote: Result<(), CacheError>,
}

/// Two-tier cache over an optional local and an optional remote store.
///
/// Cheap to clone; clones share tiers, counters, and the in-flight
/// registries.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    remote: Option<Arc<dyn RemoteCache>>,
    local: Option<LocalTier>,
    use_stale_on_error: bool,
    retry: u32,
    stats_enabled: bool,
    group: Group<(Vec<u8>, bool)>,
    refreshing: Mutex<HashSet<String>>,
    counters: Counters,
}

impl Cache {
    /// Build a cache from its configuration.
    pub fn new(config: CacheConfig) -> Self {
        let local = config.local.map(|store| {
            LocalTier::new(
                store,
                config.clock,
                config.local_ttl,
                config.local_store_ttl,
                config.background_update,
            )
        });
        Self {
            inner: Arc::new(CacheInner {
                remote: config.remote,
                local,
                use_stale_on_error: config.use_stale_on_error,
                retry: config.retry,
                stats_enabled: config.stats_enabled,
                group: Group::new(),
                refreshing: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Cache the item in every configured tier.
    ///
    /// The local write is unconditional; `if_exists`/`if_absent` guard only
    /// the remote write, and a rejected guard is not an error.
    pub async fn set<T: Cacheable>(&self, item: &Item<T>) -> Result<(), CacheError> {
        self.inner.check_configured()?;
        let outcome = self.inner.store(item).await?;
        outcome.remote
    }

    /// Get the value for `key`.
    ///
    /// `Ok(None)` means the key holds an empty payload (a nil value was
    /// cached); a missing key is [`CacheError::Miss`].
    pub async fn get<T: Cacheable>(&self, key: &str) -> Result<Option<T>, CacheError> {
        self.get_value(key, false).await
    }

    /// Get the value for `key` as if no local tier were configured.
    pub async fn get_skipping_local<T: Cacheable>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        self.get_value(key, true).await
    }

    /// Whether a `get` for `key` would succeed.
    pub async fn exists(&self, key: &str) -> bool {
        self.inner.check_configured().is_ok() && self.get_bytes(key, false).await.is_ok()
    }

    /// Remove `key` from both tiers.
    ///
    /// Returns [`CacheError::Miss`] when the remote store reports nothing
    /// deleted, so callers can tell a re-delete from a first delete.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.check_configured()?;
        if let Some(local) = &self.inner.local {
            local.del(key);
        }
        let Some(remote) = &self.inner.remote else {
            return Ok(());
        };
        let removed = remote.del(&[key]).await.map_err(CacheError::remote)?;
        if removed == 0 {
            return Err(CacheError::Miss);
        }
        Ok(())
    }

    /// Get the value for `item.key`, computing and caching it on a miss.
    ///
    /// Only one computation per key is in flight at a time; concurrent
    /// callers wait for it and share its outcome. A cached payload that no
    /// longer decodes into `T` is deleted and recomputed once.
    pub async fn once<T: Cacheable>(&self, item: Item<T>) -> Result<Option<T>, CacheError> {
        self.inner.check_configured()?;
        let mut recomputed = false;
        loop {
            let (bytes, cached) = self.once_bytes(&item).await?;
            if bytes.is_empty() {
                return Ok(None);
            }
            match codec::unmarshal::<T>(&bytes) {
                Ok(value) => return Ok(Some(value)),
                Err(err) => {
                    if cached && !recomputed {
                        debug!(
                            "cached payload for key {} failed to decode, recomputing: {}",
                            item.key, err
                        );
                        recomputed = true;
                        let _ = self.delete(&item.key).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Counter snapshot, or `None` when stats are disabled.
    pub fn stats(&self) -> Option<Stats> {
        if !self.inner.stats_enabled {
            return None;
        }
        Some(self.inner.counters.snapshot())
    }

    async fn get_value<T: Cacheable>(
        &self,
        key: &str,
        skip_local: bool,
    ) -> Result<Option<T>, CacheError> {
        self.inner.check_configured()?;
        let bytes = self.get_bytes(key, skip_local).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        codec::unmarshal(&bytes).map(Some)
    }

    /// Two-tier byte read: fresh local entries short-circuit, everything else
    /// consults the remote store. Stale-but-retained entries are served
    /// immediately with a refresh scheduled behind them; other stale bytes
    /// only surface when the remote read fails and stale fallback is on.
    async fn get_bytes(&self, key: &str, skip_local: bool) -> Result<Vec<u8>, CacheError> {
        let mut stale = None;
        if !skip_local && let Some(local) = &self.inner.local {
            match local.get(key) {
                LocalLookup::Fresh(bytes) => {
                    debug!("local cache hit for key {}", key);
                    return Ok(bytes);
                }
                LocalLookup::Stale { bytes, retained } => {
                    if retained {
                        self.spawn_refresh(key);
                        return Ok(bytes);
                    }
                    stale = (!bytes.is_empty()).then_some(bytes);
                }
                LocalLookup::Miss => {}
            }
        }

        match self.inner.remote_bytes(key, skip_local).await {
            Ok(bytes) => Ok(bytes),
            Err(CacheError::Miss) => Err(CacheError::Miss),
            Err(err) => {
                if self.inner.use_stale_on_error && let Some(bytes) = stale {
                    warn!(
                        "remote read failed for key {}, serving stale local entry: {}",
                        key, err
                    );
                    return Ok(bytes);
                }
                Err(err)
            }
        }
    }

    /// The byte half of [`Cache::once`]: local fast path, then a coalesced
    /// fetch-or-compute flight. The bool reports whether the bytes came from
    /// a cache tier rather than a fresh computation.
    async fn once_bytes<T: Cacheable>(&self, item: &Item<T>) -> Result<(Vec<u8>, bool), CacheError> {
        let mut stale = None;
        if let Some(local) = &self.inner.local {
            match local.get(&item.key) {
                LocalLookup::Fresh(bytes) => return Ok((bytes, true)),
                LocalLookup::Stale { bytes, retained } => {
                    if retained {
                        self.spawn_refresh(&item.key);
                        return Ok((bytes, true));
                    }
                    stale = (!bytes.is_empty()).then_some(bytes);
                }
                LocalLookup::Miss => {}
            }
        }

        let flight = {
            let cache = self.clone();
            let item = item.clone();
            async move {
                match cache.get_bytes(&item.key, item.skip_local).await {
                    Ok(bytes) => Ok((bytes, true)),
                    Err(_) => {
                        let outcome = cache.inner.store(&item).await?;
                        if let Err(err) = &outcome.remote {
                            // Not fatal: the computed bytes still serve every
                            // waiter; the remote catches up on the next write.
                            warn!(
                                "remote write failed for key {} during coalesced compute: {}",
                                item.key, err
                            );
                        }
                        Ok((outcome.bytes, false))
                    }
                }
            }
        };

        match self.inner.group.run(&item.key, flight).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if self.inner.use_stale_on_error && let Some(bytes) = stale {
                    warn!(
                        "coalesced compute failed for key {}, serving stale local entry: {}",
                        item.key, err
                    );
                    return Ok((bytes, true));
                }
                Err(err)
            }
        }
    }

    /// Schedule a background refetch of `key` unless one is already pending.
    /// The task holds only a weak engine reference, so pending refreshes die
    /// with the last cache handle.
    fn spawn_refresh(&self, key: &str) {
        {
            let mut refreshing = self.inner.refreshing.lock();
            if !refreshing.insert(key.to_owned()) {
                return;
            }
        }
        debug!("background refresh scheduled for key {}", key);
        let inner = Arc::downgrade(&self.inner);
        let key = key.to_owned();
        tokio::spawn(async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Err(err) = inner.remote_bytes(&key, false).await {
                warn!("background refresh failed for key {}: {}", key, err);
            }
            inner.refreshing.lock().remove(&key);
        });
    }
}

impl CacheInner {
    fn check_configured(&self) -> Result<(), CacheError> {
        if self.remote.is_none() && self.local.is_none() {
            return Err(CacheError::NoBackingStore);
        }
        Ok(())
    }

    /// Marshal and write the item. Failing to produce bytes (compute or
    /// encode failure) is the only hard error; the remote verdict travels
    /// separately in the outcome.
    async fn store<T: Cacheable>(&self, item: &Item<T>) -> Result<StoreOutcome, CacheError> {
        if item.if_exists && item.if_absent {
            return Err(CacheError::ConflictingGuards);
        }

        let bytes = match item.materialize().await? {
            Some(value) => codec::marshal(&value)?,
            None => Vec::new(),
        };

        if let Some(local) = &self.local {
            local.set(&item.key, &bytes);
        }

        let Some(remote) = &self.remote else {
            return Ok(StoreOutcome {
                bytes,
                remote: Ok(()),
            });
        };

        let ttl = item.normalized_ttl();
        let written = if item.if_exists {
            remote
                .set_if_exists(&item.key, &bytes, ttl)
                .await
                .map(|_| ())
        } else if item.if_absent {
            remote
                .set_if_absent(&item.key, &bytes, ttl)
                .await
                .map(|_| ())
        } else {
            remote.set(&item.key, &bytes, ttl).await
        };

        Ok(StoreOutcome {
            bytes,
            remote: written.map_err(CacheError::remote),
        })
    }

    /// Remote read with retries. Missing keys break immediately; transport
    /// errors are retried up to the configured count. Fetched bytes are
    /// promoted into the local tier unless the caller skipped it.
    async fn remote_bytes(&self, key: &str, skip_local: bool) -> Result<Vec<u8>, CacheError> {
        let Some(remote) = &self.remote else {
            return Err(CacheError::Miss);
        };

        let mut attempt = 0u32;
        let fetched = loop {
            match remote.get(key).await {
                Ok(value) => break Ok(value),
                Err(err) => {
                    if self.stats_enabled {
                        self.counters.err();
                    }
                    if attempt >= self.retry {
                        break Err(err);
                    }
                    attempt += 1;
                    debug!("remote read retry {} for key {}", attempt, key);
                }
            }
        };

        match fetched {
            Ok(Some(bytes)) => {
                debug!("remote cache hit for key {}", key);
                if self.stats_enabled {
                    self.counters.hit();
                }
                if !skip_local && let Some(local) = &self.local {
                    local.set(key, &bytes);
                }
                Ok(bytes)
            }
            Ok(None) => {
                debug!("remote cache miss for key {}", key);
                if self.stats_enabled {
                    self.counters.miss();
                }
                Err(CacheError::Miss)
            }
            Err(err) => Err(CacheError::remote(err)),
        }
    }
}
