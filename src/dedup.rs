//! Request deduplication.
//!
//! At most one fetch per key is outstanding at any time. Callers that arrive while a
//! fetch is pending join it through a [`Shared`] future and receive a clone of the same
//! result instead of issuing a second request.
//!
//! The pending record is removed from the table inside the shared future itself, right
//! after the producer resolves. Subscribers are only woken once that future completes,
//! so by the time anyone observes the result the key is already free and a failure can
//! not poison later attempts. Nothing is retried here; retry policy belongs to the
//! scheduler.

use std::{
    collections::HashMap,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};

use crate::{errors::FetchError, types::SourceValueBounds};

/// Handle to a fetch that may be awaited by several callers
pub type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

/// An outstanding fetch and the number of callers waiting on it
pub struct PendingRequest<V> {
    key: String,
    handle: SharedFetch<V>,
    subscriber_count: u32,
    generation: u64,
}

impl<V> PendingRequest<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn subscriber_count(&self) -> u32 {
        self.subscriber_count
    }
}

/// Ensures at most one outstanding fetch per key
///
/// Cloning yields another handle to the same pending table.
#[derive(Clone)]
pub struct RequestDeduplicator<V> {
    pending: Arc<Mutex<HashMap<String, PendingRequest<V>>>>,
    next_generation: Arc<AtomicU64>,
}

impl<V: SourceValueBounds> Default for RequestDeduplicator<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: SourceValueBounds> RequestDeduplicator<V> {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Performs the fetch for `key`, or joins the one already in flight.
    ///
    /// `producer` is only invoked when no fetch is pending for `key`, and runs without
    /// the pending table locked. A producer that panics yields a `Transport` error. The
    /// fetch runs on its own task, so it completes even if every caller drops the
    /// returned future.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fetch_once<F, Fut>(&self, key: &str, producer: F) -> SharedFetch<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        if let Some(handle) = self.join(&mut self.table(), key) {
            return handle;
        }

        let fetch = match panic::catch_unwind(AssertUnwindSafe(producer)) {
            Ok(fetch) => fetch.boxed(),
            Err(_) => {
                crate::log_fetch_error!("producer for '{}' panicked", key);
                futures::future::ready(Err(FetchError::transport("fetch producer panicked")))
                    .boxed()
            }
        };

        let mut pending = self.table();
        // Another caller may have started a fetch while the producer ran.
        if let Some(handle) = self.join(&mut pending, key) {
            return handle;
        }

        crate::log_fetch_start!("starting new request for key: {}", key);

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let table = self.pending.clone();
        let owned_key = key.to_string();

        let handle = async move {
            let result = AssertUnwindSafe(fetch)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(FetchError::transport("fetch task panicked")));

            let mut pending = table.lock().unwrap_or_else(PoisonError::into_inner);
            if pending
                .get(&owned_key)
                .is_some_and(|request| request.generation == generation)
            {
                pending.remove(&owned_key);
                crate::debug_log!("✅ [REQUEST-DEDUP] Request completed for key: {}", owned_key);
            }
            drop(pending);

            result
        }
        .boxed()
        .shared();

        pending.insert(
            key.to_string(),
            PendingRequest {
                key: key.to_string(),
                handle: handle.clone(),
                subscriber_count: 1,
                generation,
            },
        );
        drop(pending);

        crate::clock::spawn(handle.clone().map(|_| ()));
        handle
    }

    /// Check if a request is currently pending for the given key
    pub fn is_pending(&self, key: &str) -> bool {
        self.table().contains_key(key)
    }

    /// Number of callers waiting on the pending request for `key`, or 0 if none
    pub fn subscriber_count(&self, key: &str) -> u32 {
        self.table()
            .get(key)
            .map(|request| request.subscriber_count)
            .unwrap_or(0)
    }

    /// Number of keys with an outstanding request
    pub fn pending_len(&self) -> usize {
        self.table().len()
    }

    // The table is only mutated by plain inserts and removes, so it stays consistent
    // even if a holder panicked.
    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingRequest<V>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(
        &self,
        pending: &mut HashMap<String, PendingRequest<V>>,
        key: &str,
    ) -> Option<SharedFetch<V>> {
        let request = pending.get_mut(key)?;
        request.subscriber_count += 1;
        log_join(key, request.subscriber_count);
        Some(request.handle.clone())
    }
}

fn log_join(key: &str, subscribers: u32) {
    #[cfg(not(feature = "tracing"))]
    let _ = (key, subscribers);
    // Only log at powers of two so a hot key does not flood the log.
    #[cfg(feature = "tracing")]
    if subscribers.is_power_of_two() {
        crate::debug_log!(
            "🔄 [REQUEST-DEDUP] Request already pending for key: {} ({} callers waiting)",
            key,
            subscribers
        );
    }
}
