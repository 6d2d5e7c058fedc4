//! One client and one server behind a single name, for connections where both sides make calls.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use itertools::{Either, Itertools};
use rpcwire_jsonrpc::{
    Anomaly, BatchBuilder, Client, ClientBuilder, Codec, IdGenerator, JsonCodec, JsonValue, Method, MethodMap,
    RequestHandle, Server, ServerBuilder, WarnSink,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;

use crate::error::{DuplexError, Result};

pub const DEFAULT_DUPLEX_NAME: &str = "<duplex-anonymous>";

pub struct DuplexPeerBuilder {
    name: String,
    client: ClientBuilder,
    server: ServerBuilder,
    codec: Arc<dyn Codec>,
}

impl DuplexPeerBuilder {
    fn new() -> Self {
        Self {
            name: DEFAULT_DUPLEX_NAME.to_string(),
            client: Client::builder(),
            server: Server::builder(),
            codec: Arc::new(JsonCodec),
        }
    }

    /// Name used in logs, for the peer and for both of its halves
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }

    pub fn with_id_generator(mut self, ids: impl IdGenerator) -> Self {
        self.client = self.client.with_id_generator(ids);
        self
    }

    pub fn with_method(mut self, name: impl Into<String>, method: impl Method) -> Self {
        self.server = self.server.with_method(name, method);
        self
    }

    pub fn with_methods(mut self, methods: MethodMap) -> Self {
        self.server = self.server.with_methods(methods);
        self
    }

    /// Codec for both directions.  Inbound messages are decoded once to decide where they go.
    pub fn with_codec(mut self, codec: impl Codec + Clone) -> Self {
        self.client = self.client.with_codec(codec.clone());
        self.server = self.server.with_codec(codec.clone());
        self.codec = Arc::new(codec);
        self
    }

    /// Anomalies from both halves go to the same hook
    pub fn with_warn(mut self, warn: impl Fn(&Anomaly) + Send + Sync + 'static) -> Self {
        let warn = WarnSink::new(warn);
        self.client = self.client.with_warn_sink(warn.clone());
        self.server = self.server.with_warn_sink(warn);
        self
    }

    /// Attach separate hooks for outbound requests and outbound responses.
    ///
    /// Must be called within a Tokio runtime.
    pub fn bind(
        self,
        send_request: impl Fn(Vec<u8>) + Send + Sync + 'static,
        send_response: impl Fn(Vec<u8>) + Send + Sync + 'static,
    ) -> Result<DuplexPeer> {
        let client = self.client.with_name(self.name.clone()).bind(send_request)?;
        let server = self.server.with_name(self.name.clone()).bind(send_response);

        tracing::debug!(peer = %self.name, "Duplex peer bound");

        Ok(DuplexPeer {
            inner: Arc::new(PeerInner {
                name: self.name,
                client,
                server,
                codec: self.codec,
                destroyed: AtomicBool::new(false),
            }),
        })
    }

    /// Bind both hooks to one channel, which is what a single connection wants.  Drain the
    /// receiver onto the transport, see [`crate::serve`].
    pub fn bind_channel(self) -> Result<(DuplexPeer, mpsc::UnboundedReceiver<Vec<u8>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let responses = tx.clone();

        let peer = self.bind(
            move |raw| {
                if tx.send(raw).is_err() {
                    tracing::debug!("Outbound channel closed; dropping request");
                }
            },
            move |raw| {
                if responses.send(raw).is_err() {
                    tracing::debug!("Outbound channel closed; dropping response");
                }
            },
        )?;

        Ok((peer, rx))
    }
}

struct PeerInner {
    name: String,
    client: Client,
    server: Server,
    codec: Arc<dyn Codec>,
    destroyed: AtomicBool,
}

/// A client and a server sharing a connection.
///
/// Cheap to clone.  Once [`destroy`](Self::destroy) is called every operation fails with
/// [`DuplexError::Destroyed`].
#[derive(Clone)]
pub struct DuplexPeer {
    inner: Arc<PeerInner>,
}

impl DuplexPeer {
    pub fn builder() -> DuplexPeerBuilder {
        DuplexPeerBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    pub fn server(&self) -> &Server {
        &self.inner.server
    }

    pub fn request(&self, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Result<RequestHandle> {
        self.ensure_alive()?;
        Ok(self.inner.client.request(method, params)?)
    }

    pub fn notification(&self, method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> Result<()> {
        self.ensure_alive()?;
        Ok(self.inner.client.notification(method, params)?)
    }

    pub async fn call<Resp>(&self, method: &str) -> Result<Resp>
    where
        Resp: DeserializeOwned,
    {
        self.ensure_alive()?;
        Ok(self.inner.client.call(method).await?)
    }

    pub async fn call_with_params<Req, Resp>(&self, method: &str, params: Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.ensure_alive()?;
        Ok(self.inner.client.call_with_params(method, params).await?)
    }

    pub fn batch(&self) -> Result<BatchBuilder> {
        self.ensure_alive()?;
        Ok(self.inner.client.batch())
    }

    /// Feed a payload that is known to hold requests to the server half.
    pub async fn handle_request(&self, raw: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_alive()?;
        Ok(self.inner.server.handle_request(raw).await)
    }

    /// Feed a payload that is known to hold responses to the client half.
    pub fn handle_response(&self, raw: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        self.inner.client.handle_response(raw);
        Ok(())
    }

    /// Feed any inbound payload and let the peer work out where it goes.
    ///
    /// Objects with a `result` or `error` and no `method` are responses; everything else,
    /// including garbage, is the server's to answer.  A batch mixing the two is split.
    pub async fn handle_message(&self, raw: &[u8]) -> Result<()> {
        self.ensure_alive()?;

        match self.inner.codec.deserialize(raw) {
            Ok(value) => self.route(value).await,
            Err(e) => {
                tracing::debug!(peer = %self.name(), err = %e, "Undecodable message goes to the server");
                self.inner.server.handle_request(raw).await;
            }
        }

        Ok(())
    }

    async fn route(&self, value: JsonValue) {
        match value {
            JsonValue::Array(items) if !items.is_empty() => {
                let (requests, responses): (Vec<JsonValue>, Vec<JsonValue>) =
                    items.into_iter().partition_map(|item| {
                        if is_response(&item) {
                            Either::Right(item)
                        } else {
                            Either::Left(item)
                        }
                    });

                tracing::trace!(peer = %self.name(),
                    requests = requests.len(),
                    responses = responses.len(),
                    "Routing batch");

                // Responses first, so they don't wait on slow methods
                if !responses.is_empty() {
                    self.inner.client.handle_response_value(JsonValue::Array(responses));
                }
                if !requests.is_empty() {
                    self.inner.server.handle_request_value(JsonValue::Array(requests)).await;
                }
            }
            value if is_response(&value) => self.inner.client.handle_response_value(value),
            value => {
                self.inner.server.handle_request_value(value).await;
            }
        }
    }

    /// Tear down the client half and refuse all further use.  Idempotent.
    pub fn destroy(&self) {
        if !self.inner.destroyed.swap(true, Ordering::SeqCst) {
            tracing::debug!(peer = %self.name(), "Destroying duplex peer");
            self.inner.client.destroy();
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(DuplexError::Destroyed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for DuplexPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexPeer")
            .field("name", &self.inner.name)
            .field("client", &self.inner.client)
            .field("server", &self.inner.server)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

fn is_response(value: &JsonValue) -> bool {
    value.as_object().is_some_and(|object| {
        !object.contains_key("method") && (object.contains_key("result") || object.contains_key("error"))
    })
}
