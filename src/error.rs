//! Cache error types

use std::sync::Arc;

/// Boxed error type accepted from backing-store and compute callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Cache-related errors.
///
/// `CacheError` is `Clone` so the outcome of a coalesced computation can be
/// handed to every waiter; non-clonable sources are held behind `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The key is absent from every configured tier.
    #[error("cache: key is missing")]
    Miss,

    /// Neither a remote nor a local store is configured.
    #[error("cache: no remote or local store is configured")]
    NoBackingStore,

    /// An item requested both the if-exists and if-absent write guards.
    #[error("cache: if_exists and if_absent are mutually exclusive")]
    ConflictingGuards,

    /// The remote store failed for a reason other than a missing key.
    #[error("remote cache: {0}")]
    Remote(Arc<dyn std::error::Error + Send + Sync>),

    /// Serializing a value failed.
    #[error("encode: {0}")]
    Encode(Arc<rmp_serde::encode::Error>),

    /// Decoding cached bytes failed.
    #[error("decode: {0}")]
    Decode(Arc<dyn std::error::Error + Send + Sync>),

    /// Compressing or decompressing a payload failed.
    #[error("compression: {0}")]
    Compression(Arc<std::io::Error>),

    /// A payload carried a compression flag this version does not know.
    #[error("unknown compression flag {0:#04x}")]
    UnknownCompression(u8),

    /// The caller's compute callback returned an error.
    #[error("compute: {0}")]
    Compute(Arc<dyn std::error::Error + Send + Sync>),

    /// A coalesced computation was dropped before it produced a result.
    #[error("cache: in-flight computation was dropped")]
    FlightDropped,
}

impl CacheError {
    /// True for the missing-key sentinel; callers branch on this to
    /// distinguish absence from real failures.
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }

    pub(crate) fn remote(err: BoxError) -> Self {
        CacheError::Remote(Arc::from(err))
    }

    pub(crate) fn compute(err: BoxError) -> Self {
        CacheError::Compute(Arc::from(err))
    }

    pub(crate) fn encode(err: rmp_serde::encode::Error) -> Self {
        CacheError::Encode(Arc::new(err))
    }

    pub(crate) fn decode<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CacheError::Decode(Arc::new(err))
    }

    pub(crate) fn compression(err: std::io::Error) -> Self {
        CacheError::Compression(Arc::new(err))
    }
}
