//! Bookkeeping for requests that have been sent and are waiting for a response.
//!
//! The protocol has no notion of a timeout, so a response that never arrives would otherwise
//! leave its caller waiting forever.  A background sweep rejects entries that have been pending
//! longer than the configured timeout.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::ClientConfig;
use crate::error::{JsonRpcError, Result};
use crate::types::{Id, JsonValue, Response, ResponsePayload};

/// Called exactly once with the outcome of a pending request
pub type Settle = Box<dyn FnOnce(Result<JsonValue>) + Send + 'static>;

struct PendingEntry {
    method: String,
    enqueued_at: Instant,
    settle: Settle,
}

struct RegistryInner {
    name: String,
    timeout: Duration,
    entries: Mutex<HashMap<Id, PendingEntry>>,
    cancel: CancellationToken,
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<Id, PendingEntry>> {
        // Settlement callbacks never run under the lock, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep_expired(&self, now: Instant) -> usize {
        let expired = {
            let mut entries = self.entries();
            let expired_ids: Vec<Id> = entries
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.enqueued_at) > self.timeout)
                .map(|(id, _)| id.clone())
                .collect();

            expired_ids
                .into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect::<Vec<_>>()
        };

        let count = expired.len();
        for (id, entry) in expired {
            tracing::debug!(client = %self.name,
                request_id = %id,
                method = %entry.method,
                "Pending request timed out");
            (entry.settle)(Err(JsonRpcError::Timeout {
                method: entry.method,
                id,
                timeout: self.timeout,
            }));
        }

        count
    }
}

/// Pending requests of one client, keyed by request id.
///
/// Every entry settles at most once: on a matching response, or with [`JsonRpcError::Timeout`]
/// when the sweep finds it too old.  After [`destroy`](Self::destroy) the sweep stops and
/// remaining entries are never settled.
pub struct PendingRegistry {
    inner: Arc<RegistryInner>,
    _sweeper: DropGuard,
}

impl std::fmt::Debug for PendingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("client", &self.inner.name)
            .field("timeout", &self.inner.timeout)
            .field("pending", &self.len())
            .finish()
    }
}

impl PendingRegistry {
    /// Create the registry and start its sweep task on the current Tokio runtime.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let handle = tokio::runtime::Handle::try_current().map_err(|_| JsonRpcError::NoAsyncRuntime)?;

        let inner = Arc::new(RegistryInner {
            name: config.name.clone(),
            timeout: config.timeout,
            entries: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        });

        handle.spawn(Self::sweep_loop(
            Arc::downgrade(&inner),
            inner.cancel.clone(),
            config.sweep_interval,
        ));

        let sweeper = inner.cancel.clone().drop_guard();

        Ok(Self {
            inner,
            _sweeper: sweeper,
        })
    }

    async fn sweep_loop(inner: Weak<RegistryInner>, cancel: CancellationToken, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    inner.sweep_expired(Instant::now());
                }
            }
        }

        tracing::trace!("Pending request sweep stopped");
    }

    /// Register a request and get a receiver for its outcome.
    pub fn put(&self, id: Id, method: impl Into<String>) -> Result<oneshot::Receiver<Result<JsonValue>>> {
        let (tx, rx) = oneshot::channel();
        self.put_with(
            id,
            method,
            Box::new(move |outcome| {
                // The receiver may have been dropped if the caller lost interest
                let _ = tx.send(outcome);
            }),
        )?;
        Ok(rx)
    }

    /// Register a request whose outcome is delivered to a callback.
    pub fn put_with(&self, id: Id, method: impl Into<String>, settle: Settle) -> Result<()> {
        self.put_batch(vec![(id, method.into(), settle)])
    }

    /// Register several requests at once.  Either all are registered or, if any id is already
    /// live (or repeated in `entries`), none are.
    pub fn put_batch(&self, entries: Vec<(Id, String, Settle)>) -> Result<()> {
        let now = Instant::now();
        let mut live = self.inner.entries();

        for (index, (id, _, _)) in entries.iter().enumerate() {
            if live.contains_key(id) || entries[..index].iter().any(|(other, _, _)| other == id) {
                return Err(JsonRpcError::DuplicateRequestId { id: id.clone() });
            }
        }

        for (id, method, settle) in entries {
            tracing::trace!(client = %self.inner.name, request_id = %id, %method, "Registered pending request");
            live.insert(
                id,
                PendingEntry {
                    method,
                    enqueued_at: now,
                    settle,
                },
            );
        }

        Ok(())
    }

    /// Settle the entry matching `response.id`, if there is one.
    ///
    /// Returns `false` for responses to unknown ids: duplicates, late arrivals after a timeout,
    /// and ids this client never sent are all ignored.
    pub fn end(&self, response: Response) -> bool {
        let Some(entry) = self.inner.entries().remove(&response.id) else {
            tracing::debug!(client = %self.inner.name,
                request_id = %response.id,
                "Ignoring response with no matching pending request");
            return false;
        };

        tracing::trace!(client = %self.inner.name,
            request_id = %response.id,
            method = %entry.method,
            is_error = response.is_error(),
            "Settling pending request");

        let outcome = match response.payload {
            ResponsePayload::Success(success) => Ok(success.result),
            ResponsePayload::Error(error) => Err(JsonRpcError::Remote {
                method: entry.method,
                error: error.error,
            }),
        };
        (entry.settle)(outcome);

        true
    }

    /// Stop the sweep.  Entries still pending stay pending.
    pub fn destroy(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }
}
