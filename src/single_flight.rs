//! Single-flight request coalescing
//!
//! Guarantees one in-flight computation per key: while a flight is running,
//! every additional caller for the same key waits on it and receives the same
//! outcome. Flights run on their own task, so a caller that stops waiting
//! never aborts the computation for the others.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::CacheError;

type FlightSlot<T> = Option<Result<T, CacheError>>;
type FlightMap<T> = Arc<Mutex<HashMap<String, watch::Receiver<FlightSlot<T>>>>>;

pub(crate) struct Group<T> {
    flights: FlightMap<T>,
}

impl<T> Group<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `thunk` for `key`, unless a flight for the key is already in
    /// progress, in which case wait for that flight's outcome instead.
    pub(crate) async fn run<F>(&self, key: &str, thunk: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let rx = {
            let mut flights = self.flights.lock();
            if let Some(rx) = flights.get(key) {
                rx.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                flights.insert(key.to_owned(), rx.clone());
                let guard = FlightGuard {
                    key: key.to_owned(),
                    flights: Arc::clone(&self.flights),
                    tx: Some(tx),
                };
                tokio::spawn(async move {
                    let result = thunk.await;
                    guard.complete(result);
                });
                rx
            }
        };
        wait(rx).await
    }
}

async fn wait<T: Clone>(mut rx: watch::Receiver<FlightSlot<T>>) -> Result<T, CacheError> {
    loop {
        {
            let slot = rx.borrow();
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
        }
        if rx.changed().await.is_err() {
            return Err(CacheError::FlightDropped);
        }
    }
}

/// Publishes a flight's outcome and cleans up its registry entry.
///
/// The entry is removed before waiters are notified, so a new call for the
/// same key starts a fresh flight. If the flight task dies without
/// completing, the drop path tells the waiters instead of leaving them
/// hanging.
struct FlightGuard<T> {
    key: String,
    flights: FlightMap<T>,
    tx: Option<watch::Sender<FlightSlot<T>>>,
}

impl<T> FlightGuard<T> {
    fn complete(mut self, result: Result<T, CacheError>) {
        self.flights.lock().remove(&self.key);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Some(result));
        }
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.flights.lock().remove(&self.key);
            let _ = tx.send(Some(Err(CacheError::FlightDropped)));
        }
    }
}
