//! Local tier
//!
//! The in-process side of the cache: a byte-indexed store behind the
//! [`LocalCache`] trait, wrapped by [`LocalTier`] which stamps each entry
//! with a 4-byte write time and classifies reads by age. The default store is
//! a size-bounded [Moka](https://docs.rs/moka) cache.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::clock::Clock;

/// In-process byte cache capability.
///
/// Implementations must be safe for concurrent use and should never block;
/// eviction and memory accounting are the implementation's concern.
pub trait LocalCache: Send + Sync + 'static {
    /// Store an entry, replacing any previous value.
    fn set(&self, key: &[u8], value: &[u8]);

    /// Fetch an entry, or `None` when absent.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Drop an entry if present.
    fn del(&self, key: &[u8]);
}

/// [`LocalCache`] backed by a size-bounded Moka cache.
///
/// Capacity is counted in bytes across keys and values.
pub struct MokaLocalCache {
    cache: moka::sync::Cache<Box<[u8]>, Arc<[u8]>>,
}

impl MokaLocalCache {
    /// Create a cache holding at most `max_bytes` of keys plus values.
    pub fn new(max_bytes: u64) -> Self {
        let cache = moka::sync::Cache::builder()
            .weigher(|key: &Box<[u8]>, value: &Arc<[u8]>| {
                (key.len() + value.len()).min(u32::MAX as usize) as u32
            })
            .max_capacity(max_bytes)
            .build();
        Self { cache }
    }
}

impl LocalCache for MokaLocalCache {
    fn set(&self, key: &[u8], value: &[u8]) {
        self.cache.insert(Box::from(key), Arc::from(value));
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.cache.get(key).map(|value| value.to_vec())
    }

    fn del(&self, key: &[u8]) {
        self.cache.invalidate(key);
    }
}

/// Outcome of a local lookup, classified by entry age.
pub(crate) enum LocalLookup {
    /// No entry for the key.
    Miss,
    /// Entry within the freshness bound (or timestamping is disabled).
    Fresh(Vec<u8>),
    /// Entry older than the freshness bound. `retained` is true when the
    /// entry is still within the retention bound and was left in place for
    /// a background refresh; false when it aged out and was evicted.
    Stale { bytes: Vec<u8>, retained: bool },
}

/// Timestamps count seconds from 2020-01-01T00:00:00Z so the u32 counter
/// lasts ~136 years.
const EPOCH_OFFSET_SECS: u64 = 1_577_836_800;

const TIMESTAMP_LEN: usize = 4;

/// Local store plus entry timestamping.
///
/// When a retention bound is configured, every entry carries a trailing
/// 4-byte little-endian write time; the suffix never escapes this type.
pub(crate) struct LocalTier {
    store: Arc<dyn LocalCache>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    store_ttl: Duration,
    background_update: bool,
}

impl LocalTier {
    pub(crate) fn new(
        store: Arc<dyn LocalCache>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        store_ttl: Duration,
        background_update: bool,
    ) -> Self {
        Self {
            store,
            clock,
            ttl,
            store_ttl,
            background_update,
        }
    }

    pub(crate) fn set(&self, key: &str, payload: &[u8]) {
        if self.store_ttl.is_zero() {
            self.store.set(key.as_bytes(), payload);
            return;
        }
        let mut entry = Vec::with_capacity(payload.len() + TIMESTAMP_LEN);
        entry.extend_from_slice(payload);
        entry.extend_from_slice(&encode_time(self.clock.now()));
        self.store.set(key.as_bytes(), &entry);
    }

    pub(crate) fn get(&self, key: &str) -> LocalLookup {
        let Some(entry) = self.store.get(key.as_bytes()) else {
            return LocalLookup::Miss;
        };
        if entry.is_empty() || self.store_ttl.is_zero() {
            return LocalLookup::Fresh(entry);
        }
        if entry.len() < TIMESTAMP_LEN {
            // Written before timestamping was enabled, or corrupt.
            self.store.del(key.as_bytes());
            return LocalLookup::Miss;
        }

        let (payload, suffix) = entry.split_at(entry.len() - TIMESTAMP_LEN);
        let written = decode_time([suffix[0], suffix[1], suffix[2], suffix[3]]);
        let age = self
            .clock
            .now()
            .duration_since(written)
            .unwrap_or_default();

        if age > self.store_ttl {
            self.store.del(key.as_bytes());
            return LocalLookup::Stale {
                bytes: payload.to_vec(),
                retained: false,
            };
        }
        if !self.ttl.is_zero() && age > self.ttl {
            if self.background_update {
                return LocalLookup::Stale {
                    bytes: payload.to_vec(),
                    retained: true,
                };
            }
            self.store.del(key.as_bytes());
            return LocalLookup::Stale {
                bytes: payload.to_vec(),
                retained: false,
            };
        }
        LocalLookup::Fresh(payload.to_vec())
    }

    pub(crate) fn del(&self, key: &str) {
        self.store.del(key.as_bytes());
    }
}

fn encode_time(now: SystemTime) -> [u8; TIMESTAMP_LEN] {
    let unix = now
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (unix.saturating_sub(EPOCH_OFFSET_SECS) as u32).to_le_bytes()
}

fn decode_time(suffix: [u8; TIMESTAMP_LEN]) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::from(u32::from_le_bytes(suffix)) + EPOCH_OFFSET_SECS)
}
