//! Server core: decodes inbound payloads, runs them through the dispatch pipeline and sends back
//! whatever responses result.
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::anomaly::{Anomaly, WarnSink};
use crate::codec::{self, Codec, JsonCodec, SendHook};
use crate::config::ServerConfig;
use crate::method::{Method, MethodMap};
use crate::pipeline::Dispatcher;
use crate::types::{ErrorDetails, Id, JsonValue, Payload, Response};

pub struct ServerBuilder {
    config: ServerConfig,
    methods: MethodMap,
    codec: Arc<dyn Codec>,
    warn: WarnSink,
}

impl ServerBuilder {
    fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            methods: MethodMap::new(),
            codec: Arc::new(JsonCodec),
            warn: WarnSink::default(),
        }
    }

    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn with_method(mut self, name: impl Into<String>, method: impl Method) -> Self {
        self.methods.insert(name, method);
        self
    }

    /// Add every method in `methods`, replacing same-named methods already registered
    pub fn with_methods(mut self, methods: MethodMap) -> Self {
        self.methods.extend(methods);
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

    /// Attach the hook that carries encoded responses back to the peer.
    pub fn bind(self, send_response: impl Fn(Vec<u8>) + Send + Sync + 'static) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                dispatcher: Dispatcher::new(self.config.name, self.methods, self.warn),
                codec: self.codec,
                send_response: Arc::new(send_response),
            }),
        }
    }
}

struct ServerInner {
    dispatcher: Dispatcher,
    codec: Arc<dyn Codec>,
    send_response: SendHook,
}

/// The server half of a JSON-RPC peer.
///
/// Cheap to clone; clones share the method table and hooks.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn name(&self) -> &str {
        self.inner.dispatcher.name()
    }

    /// Handle one inbound payload.
    ///
    /// Never fails: malformed input becomes an error response.  The response, if any, is passed
    /// to the `send_response` hook exactly once and also returned.  Nothing is sent when the
    /// payload contained only notifications.
    pub async fn handle_request(&self, raw: &[u8]) -> Option<Vec<u8>> {
        match codec::decode(self.inner.codec.as_ref(), raw) {
            Ok(value) => self.handle_request_value(value).await,
            Err(e) => {
                self.inner
                    .dispatcher
                    .warn()
                    .report(self.name(), Anomaly::Undecodable { source: Box::new(e) });
                self.send(Payload::Single(Response::error(Id::Null, ErrorDetails::parse_error())))
            }
        }
    }

    /// Like [`handle_request`](Self::handle_request), for a payload the transport has already
    /// decoded.
    pub async fn handle_request_value(&self, value: JsonValue) -> Option<Vec<u8>> {
        let payload = match value {
            JsonValue::Array(items) if items.is_empty() => {
                tracing::debug!(server = %self.name(), "Rejecting empty batch");
                Some(Payload::Single(Response::error(Id::Null, ErrorDetails::invalid_request())))
            }
            JsonValue::Array(items) => {
                let count = items.len();

                // Responses are collected in the order the pipeline runs finish
                let responses: Vec<Response> = items
                    .into_iter()
                    .map(|item| self.inner.dispatcher.dispatch(item))
                    .collect::<FuturesUnordered<_>>()
                    .filter_map(futures::future::ready)
                    .collect()
                    .await;

                tracing::debug!(server = %self.name(),
                    requests = count,
                    responses = responses.len(),
                    "Batch dispatched");

                (!responses.is_empty()).then_some(Payload::Batch(responses))
            }
            value => self.inner.dispatcher.dispatch(value).await.map(Payload::Single),
        };

        payload.and_then(|payload| self.send(payload))
    }

    fn send(&self, payload: Payload<Response>) -> Option<Vec<u8>> {
        match codec::encode(self.inner.codec.as_ref(), &payload) {
            Ok(raw) => {
                (self.inner.send_response)(raw.clone());
                Some(raw)
            }
            Err(e) => {
                self.inner.dispatcher.warn().report(
                    self.name(),
                    Anomaly::Unencodable {
                        source: Box::new(e),
                    },
                );
                None
            }
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("name", &self.name()).finish()
    }
}
