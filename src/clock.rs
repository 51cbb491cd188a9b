//! Wall-clock abstraction for local-entry timestamps

use std::time::SystemTime;

/// Time source used when stamping and aging local cache entries.
///
/// The default [`SystemClock`] reads the system wall clock; tests inject a
/// manual clock to drive entries through their freshness windows.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    /// Manually advanced clock for freshness tests.
    #[derive(Debug)]
    pub(crate) struct ManualClock {
        unix_secs: AtomicU64,
    }

    impl ManualClock {
        pub(crate) fn new(unix_secs: u64) -> Self {
            Self {
                unix_secs: AtomicU64::new(unix_secs),
            }
        }

        pub(crate) fn advance(&self, secs: u64) {
            self.unix_secs.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            UNIX_EPOCH + Duration::from_secs(self.unix_secs.load(Ordering::SeqCst))
        }
    }
}
