//! Cache configuration

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::local::LocalCache;
use crate::remote::RemoteCache;

/// Configuration for the two-tier cache.
///
/// At least one of `remote` and `local` must be set; a cache configured with
/// neither fails every operation with [`CacheError::NoBackingStore`].
///
/// [`CacheError::NoBackingStore`]: crate::CacheError::NoBackingStore
#[derive(Clone)]
pub struct CacheConfig {
    /// Remote tier, typically Redis. Optional when `local` is set.
    pub remote: Option<Arc<dyn RemoteCache>>,

    /// In-process tier. Optional when `remote` is set.
    pub local: Option<Arc<dyn LocalCache>>,

    /// Soft freshness bound: local entries older than this are stale and
    /// trigger a remote read. Zero disables the staleness check.
    pub local_ttl: Duration,

    /// Hard retention bound: local entries older than this are evicted on
    /// read. Zero disables entry timestamping entirely.
    pub local_store_ttl: Duration,

    /// Serve stale-but-retained local entries immediately and refresh them
    /// from the remote tier in the background.
    pub background_update: bool,

    /// Mask remote read failures with stale local data when available.
    pub use_stale_on_error: bool,

    /// Additional attempts for failed remote reads (total attempts are
    /// `retry + 1`). Missing keys are never retried.
    pub retry: u32,

    /// Track hit/miss/error counters, readable through `Cache::stats`.
    pub stats_enabled: bool,

    /// Time source for local entry timestamps. Override in tests.
    pub clock: Arc<dyn Clock>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            remote: None,
            local: None,
            local_ttl: Duration::ZERO,
            local_store_ttl: Duration::ZERO,
            background_update: false,
            use_stale_on_error: false,
            retry: 0,
            stats_enabled: false,
            clock: Arc::new(SystemClock),
        }
    }
}
