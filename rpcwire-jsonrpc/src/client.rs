//! Client correlation core.
//!
//! Builds and sends requests through the `send_request` hook, and matches inbound responses to
//! the requests that are waiting for them.
use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use itertools::{Either, Itertools};
use pin_project::pin_project;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::oneshot;
use tracing::instrument;

use crate::anomaly::{Anomaly, WarnSink};
use crate::batch::BatchBuilder;
use crate::codec::{self, Codec, JsonCodec, SendHook};
use crate::config::ClientConfig;
use crate::error::{JsonRpcError, Result};
use crate::id::{CounterIdGenerator, IdGenerator};
use crate::registry::PendingRegistry;
use crate::types::{Id, JsonValue, Payload, Request, Response};
use crate::validate;

pub struct ClientBuilder {
    config: ClientConfig,
    ids: Box<dyn IdGenerator>,
    codec: Arc<dyn Codec>,
    warn: WarnSink,
}

impl ClientBuilder {
    fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            ids: Box::new(CounterIdGenerator::new()),
            codec: Arc::new(JsonCodec),
            warn: WarnSink::default(),
        }
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn with_codec(mut self, codec: impl Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn with_warn(mut self, warn: impl Fn(&Anomaly) + Send + Sync + 'static) -> Self {
        self.warn = WarnSink::new(warn);
        self
    }

    pub fn with_warn_sink(mut self, warn: WarnSink) -> Self {
        self.warn = warn;
        self
    }

    /// Attach the hook that carries encoded requests to the peer.
    ///
    /// Must be called within a Tokio runtime, which runs the pending request sweep.
    pub fn bind(self, send_request: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Result<Client> {
        let registry = PendingRegistry::new(&self.config)?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                name: self.config.name,
                ids: self.ids,
                codec: self.codec,
                send_request: Arc::new(send_request),
                warn: self.warn,
                registry,
            }),
        })
    }
}

pub(crate) struct ClientInner {
    pub(crate) name: String,
    ids: Box<dyn IdGenerator>,
    codec: Arc<dyn Codec>,
    send_request: SendHook,
    warn: WarnSink,
    pub(crate) registry: PendingRegistry,
}

impl ClientInner {
    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.registry.is_destroyed() {
            Err(JsonRpcError::ClientDestroyed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn next_id(&self) -> Id {
        self.ids.next_id()
    }

    pub(crate) fn encode<T: Serialize>(&self, payload: &Payload<T>) -> Result<Vec<u8>> {
        codec::encode(self.codec.as_ref(), payload)
    }

    pub(crate) fn send(&self, raw: Vec<u8>) {
        (self.send_request)(raw)
    }
}

/// Params must be absent, an array or an object.
pub(crate) fn check_params(method: &str, params: Option<&JsonValue>) -> Result<()> {
    match params {
        Some(params) if !validate::is_valid_params(params) => Err(JsonRpcError::InvalidParamsType {
            method: method.to_string(),
        }),
        _ => Ok(()),
    }
}

/// The client half of a JSON-RPC peer.
///
/// Cheap to clone; clones share the id generator, pending requests and hooks.  Dropping the last
/// clone drops every pending request, which then fails with
/// [`JsonRpcError::PendingRequestDropped`].
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Send a request and get a future for its outcome.
    ///
    /// Misuse (params of the wrong type, a destroyed client) fails here, before an id is
    /// allocated or anything is sent.  The returned future settles exactly once: with the result,
    /// with [`JsonRpcError::Remote`] if the peer answered with an error, or with
    /// [`JsonRpcError::Timeout`] if no answer came in time.
    #[instrument(skip_all, fields(client = %self.inner.name, method, request_id))]
    pub fn request(&self, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Result<RequestHandle> {
        self.request_typed(method.into(), params.into())
    }

    fn request_typed<T>(&self, method: String, params: Option<JsonValue>) -> Result<RequestHandle<T>> {
        check_params(&method, params.as_ref())?;
        self.inner.ensure_alive()?;

        let id = self.inner.next_id();
        let span = tracing::Span::current();
        span.record("method", method.as_str());
        span.record("request_id", tracing::field::display(&id));

        let request = Request::new(method.clone(), params, id.clone());
        let raw = self.inner.encode(&Payload::Single(request))?;

        // Registered before sending so that a response delivered from inside the hook still
        // finds its entry
        let rx = self.inner.registry.put(id.clone(), method.clone())?;
        self.inner.send(raw);

        tracing::debug!("Sent request");

        Ok(RequestHandle::new(id, method, rx))
    }

    /// Send a notification.  Nothing is registered and no response is expected.
    #[instrument(skip_all, fields(client = %self.inner.name, method))]
    pub fn notification(&self, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Result<()> {
        let method = method.into();
        tracing::Span::current().record("method", method.as_str());
        let params = params.into();
        check_params(&method, params.as_ref())?;
        self.inner.ensure_alive()?;

        let raw = self.inner.encode(&Payload::Single(Request::notification(method, params)))?;
        self.inner.send(raw);

        Ok(())
    }

    /// Call a method without params and deserialize its result.
    pub async fn call<Resp>(&self, method: &str) -> Result<Resp>
    where
        Resp: DeserializeOwned,
    {
        self.request_typed::<Resp>(method.to_string(), None)?.await
    }

    /// Call a method with params that serialize to an array or object, and deserialize its
    /// result.
    pub async fn call_with_params<Req, Resp>(&self, method: &str, params: Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let params = Self::serialize_params(params)?;
        self.request_typed::<Resp>(method.to_string(), Some(params))?.await
    }

    pub fn notify_with_params<Req>(&self, method: &str, params: Req) -> Result<()>
    where
        Req: Serialize,
    {
        let params = Self::serialize_params(params)?;
        self.notification(method, params)
    }

    fn serialize_params<Req: Serialize>(params: Req) -> Result<JsonValue> {
        serde_json::to_value(params).map_err(|source| JsonRpcError::SerRequest {
            source,
            type_name: type_name::<Req>(),
        })
    }

    /// Start a batch.
    pub fn batch(&self) -> BatchBuilder {
        BatchBuilder::new(self.inner.clone())
    }

    /// Handle one inbound payload of responses.
    ///
    /// Never fails.  Anything that is not a valid response (or batch of them) is reported to the
    /// anomaly sink and otherwise ignored.
    pub fn handle_response(&self, raw: &[u8]) {
        match codec::decode(self.inner.codec.as_ref(), raw) {
            Ok(value) => self.handle_response_value(value),
            Err(e) => self.warn(Anomaly::Undecodable { source: Box::new(e) }),
        }
    }

    /// Like [`handle_response`](Self::handle_response), for a payload the transport has
    /// already decoded.
    pub fn handle_response_value(&self, value: JsonValue) {
        if self.inner.registry.is_destroyed() {
            self.warn(Anomaly::ResponseAfterDestroy { response: value });
            return;
        }

        match value {
            JsonValue::Array(items) if items.is_empty() => self.warn(Anomaly::EmptyResponseBatch),
            JsonValue::Array(items) => {
                let (valid, invalid): (Vec<Response>, Vec<JsonValue>) =
                    items.into_iter().partition_map(|item| match Self::parse_response(item) {
                        Ok(response) => Either::Left(response),
                        Err(item) => Either::Right(item),
                    });

                for response in invalid {
                    self.warn(Anomaly::InvalidResponse { response });
                }

                for response in valid {
                    self.inner.registry.end(response);
                }
            }
            value => match Self::parse_response(value) {
                Ok(response) => {
                    self.inner.registry.end(response);
                }
                Err(response) => self.warn(Anomaly::InvalidResponse { response }),
            },
        }
    }

    fn parse_response(value: JsonValue) -> std::result::Result<Response, JsonValue> {
        if !validate::is_valid_response(&value) {
            return Err(value);
        }

        let parsed = Response::deserialize(&value);
        parsed.map_err(|_| value)
    }

    /// Stop the pending request sweep and refuse further use.
    ///
    /// Requests still pending are not settled; callers should drain in-flight work first.
    pub fn destroy(&self) {
        tracing::debug!(client = %self.inner.name,
            pending = self.inner.registry.len(),
            "Destroying client");
        self.inner.registry.destroy();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.registry.is_destroyed()
    }

    /// Number of requests waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.inner.registry.len()
    }

    fn warn(&self, anomaly: Anomaly) {
        self.inner.warn.report(&self.inner.name, anomaly);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.registry.len())
            .finish()
    }
}

/// Future for the outcome of one request, deserialized as `T`.
#[pin_project]
pub struct RequestHandle<T = JsonValue> {
    id: Id,
    method: String,
    #[pin]
    rx: oneshot::Receiver<Result<JsonValue>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RequestHandle<T> {
    pub(crate) fn new(id: Id, method: String, rx: oneshot::Receiver<Result<JsonValue>>) -> Self {
        Self {
            id,
            method,
            rx,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl<T> std::fmt::Debug for RequestHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("response_type", &type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> Future for RequestHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let value = match ready!(this.rx.poll(cx)) {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => return Poll::Ready(Err(e)),
            Err(_) => return Poll::Ready(Err(JsonRpcError::PendingRequestDropped)),
        };

        let parsed = T::deserialize(&value);
        Poll::Ready(parsed.map_err(|source| JsonRpcError::DeserResponse {
            source,
            type_name: type_name::<T>(),
            response: value,
        }))
    }
}
