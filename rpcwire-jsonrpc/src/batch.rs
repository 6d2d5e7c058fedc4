//! Client-side batches.
//!
//! A [`BatchBuilder`] queues requests and notifications, then sends them as one payload.  Each
//! request settles independently through its own callback (or [`RequestHandle`]); the batch as a
//! whole moves `READY -> PENDING -> END`, reaching `END` once every request in it has settled.
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::de::DeserializeOwned;
use strum::Display;
use tokio::sync::{oneshot, watch};

use crate::client::{ClientInner, RequestHandle, check_params};
use crate::error::{JsonRpcError, Result};
use crate::registry::Settle;
use crate::types::{Id, JsonValue, Payload, Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum BatchStatus {
    /// Accepting requests
    Ready,
    /// Sent, with requests still waiting for a response
    Pending,
    /// Sent, and every request has settled
    End,
}

/// Receives the outcome of one request in a batch
pub type BatchCallback = Box<dyn FnOnce(Result<JsonValue>) + Send + 'static>;

struct BatchTask {
    request: Request,
    callback: Option<BatchCallback>,
}

pub struct BatchBuilder {
    client: Arc<ClientInner>,
    tasks: Vec<BatchTask>,
    status: Arc<watch::Sender<BatchStatus>>,
}

impl BatchBuilder {
    pub(crate) fn new(client: Arc<ClientInner>) -> Self {
        let (status, _) = watch::channel(BatchStatus::Ready);
        Self {
            client,
            tasks: Vec::new(),
            status: Arc::new(status),
        }
    }

    pub fn status(&self) -> BatchStatus {
        *self.status.borrow()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.status() {
            BatchStatus::Ready => Ok(()),
            status => Err(JsonRpcError::BatchAlreadySent { status }),
        }
    }

    /// Queue a request whose outcome goes to `callback`.
    ///
    /// The id is allocated now, so ids follow queueing order.
    pub fn request(
        &mut self,
        method: impl Into<String>,
        params: impl Into<Option<JsonValue>>,
        callback: impl FnOnce(Result<JsonValue>) + Send + 'static,
    ) -> Result<&mut Self> {
        self.push(method.into(), params.into(), Some(Box::new(callback)))
    }

    /// Queue a notification.
    pub fn notificate(&mut self, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Result<&mut Self> {
        self.push(method.into(), params.into(), None)
    }

    /// Queue a request and get a future for its outcome instead of a callback.
    ///
    /// The future only makes progress once the batch has been sent.
    pub fn call<T: DeserializeOwned>(
        &mut self,
        method: impl Into<String>,
        params: impl Into<Option<JsonValue>>,
    ) -> Result<RequestHandle<T>> {
        let method = method.into();
        let (tx, rx) = oneshot::channel();

        self.push(
            method.clone(),
            params.into(),
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        )?;

        let id = self
            .tasks
            .last()
            .and_then(|task| task.request.id.clone())
            .unwrap_or(Id::Null);

        Ok(RequestHandle::new(id, method, rx))
    }

    fn push(&mut self, method: String, params: Option<JsonValue>, callback: Option<BatchCallback>) -> Result<&mut Self> {
        self.ensure_ready()?;
        check_params(&method, params.as_ref())?;
        self.client.ensure_alive()?;

        let request = match &callback {
            Some(_) => Request::new(method, params, self.client.next_id()),
            None => Request::notification(method, params),
        };
        self.tasks.push(BatchTask { request, callback });

        Ok(self)
    }

    /// Send every queued request and notification as one payload.
    ///
    /// Fails if the batch is empty or was already sent.  On success the builder is `PENDING`, or
    /// `END` straight away if it held only notifications.
    pub fn send(&mut self) -> Result<()> {
        self.ensure_ready()?;
        if self.tasks.is_empty() {
            return Err(JsonRpcError::EmptyBatch);
        }
        self.client.ensure_alive()?;

        let raw = self
            .client
            .encode(&Payload::Batch(self.tasks.iter().map(|task| &task.request).collect()))?;

        self.status.send_replace(BatchStatus::Pending);

        let callbacks: Vec<(Id, String, BatchCallback)> = std::mem::take(&mut self.tasks)
            .into_iter()
            .filter_map(|task| match (task.request.id, task.callback) {
                (Some(id), Some(callback)) => Some((id, task.request.method, callback)),
                _ => None,
            })
            .collect();

        let remaining = Arc::new(AtomicUsize::new(callbacks.len()));
        let expected = callbacks.len();

        let entries: Vec<(Id, String, Settle)> = callbacks
            .into_iter()
            .map(|(id, method, callback)| {
                let remaining = remaining.clone();
                let status = self.status.clone();
                let settle: Settle = Box::new(move |outcome| {
                    callback(outcome);
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        status.send_replace(BatchStatus::End);
                    }
                });
                (id, method, settle)
            })
            .collect();

        if let Err(e) = self.client.registry.put_batch(entries) {
            // Nothing was registered or sent, but the tasks are gone
            self.status.send_replace(BatchStatus::End);
            return Err(e);
        }

        self.client.send(raw);
        tracing::debug!(client = %self.client.name, requests = expected, "Sent batch");

        if expected == 0 {
            self.status.send_replace(BatchStatus::End);
        }

        Ok(())
    }

    /// Wait until the batch reaches `END`.
    ///
    /// Never completes for a batch that is not sent, or whose requests never settle (as happens
    /// after the client is destroyed).
    pub async fn finished(&self) {
        let mut rx = self.status.subscribe();

        // The sender lives as long as `self`, so this can only end by reaching END
        let _ = rx.wait_for(|status| *status == BatchStatus::End).await;
    }
}

impl std::fmt::Debug for BatchBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuilder")
            .field("client", &self.client.name)
            .field("status", &self.status())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}
