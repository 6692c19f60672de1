//! Single-flight request coalescing
//!
//! At most one loader runs per key at any instant. The loader is spawned on
//! the runtime, so a caller that stops waiting never cancels a call other
//! subscribers still depend on. The pending entry is removed by the loader
//! task itself once the call settles, and the next call for that key starts a
//! fresh load.

use crate::error::{DataAccessError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

type SharedOutcome<V> = Shared<BoxFuture<'static, Result<V>>>;

/// An in-flight call and everyone waiting on it
struct PendingRequest<V> {
    id: u64,
    future: SharedOutcome<V>,
    subscriber_count: usize,
}

/// Coalesces concurrent identical calls into one underlying call
pub struct SingleFlight<V> {
    pending: Arc<Mutex<HashMap<String, PendingRequest<V>>>>,
    next_id: AtomicU64,
}

impl<V> std::fmt::Debug for SingleFlight<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.pending.lock().len())
            .finish()
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `loader` for `key` unless a call for `key` is already in flight, in
    /// which case wait for that call's outcome instead.
    pub async fn run<F, Fut>(&self, key: &str, loader: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let shared = {
            let mut pending = self.pending.lock();

            if let Some(request) = pending.get_mut(key) {
                request.subscriber_count += 1;
                debug!(
                    key = key,
                    subscribers = request.subscriber_count,
                    "Joining in-flight request"
                );
                request.future.clone()
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let future = self.spawn_loader(key.to_string(), id, loader());
                pending.insert(
                    key.to_string(),
                    PendingRequest {
                        id,
                        future: future.clone(),
                        subscriber_count: 1,
                    },
                );
                future
            }
        };

        shared.await
    }

    /// Number of keys with a call currently in flight
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Callers currently attached to the in-flight call for `key`
    pub fn subscribers(&self, key: &str) -> usize {
        self.pending
            .lock()
            .get(key)
            .map_or(0, |request| request.subscriber_count)
    }

    fn spawn_loader<Fut>(&self, key: String, id: u64, load: Fut) -> SharedOutcome<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let registry = Arc::clone(&self.pending);

        // The insert happens under the same lock acquisition as the spawn, so
        // this removal can never run before the entry exists.
        let handle = tokio::spawn(async move {
            let outcome = load.await;
            let mut pending = registry.lock();
            if pending.get(&key).is_some_and(|request| request.id == id) {
                pending.remove(&key);
            }
            outcome
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    error!(error = %join_error, "Single-flight loader task failed");
                    Err(DataAccessError::upstream(format!(
                        "loader task failed: {join_error}"
                    )))
                }
            }
        }
        .boxed()
        .shared()
    }
}
