//! A transport-agnostic implementation of the JSON-RPC 2.0 protocol.
//!
//! Nothing in this crate performs I/O.  A [`Client`] and a [`Server`] are each given a hook to
//! call with encoded outbound payloads, and the transport feeds inbound payloads to
//! [`Client::handle_response`] and [`Server::handle_request`].  Everything between those two
//! boundaries is the protocol itself: correlating responses with the requests that caused them,
//! abandoning requests that are never answered, batching, validating inbound payloads, and
//! turning method failures into wire-safe error objects.
//!
//! This library owes a debt to the [`jsonrpsee`](https://github.com/paritytech/jsonrpsee) project,
//! from which it borrows some protocol primitives.

/// Re-export the exact async-trait macro we use, for implementing [`Method`] by hand
#[doc(hidden)]
pub use async_trait::async_trait;

mod anomaly;
mod batch;
mod client;
mod codec;
mod config;
mod error;
mod id;
mod method;
mod pipeline;
mod registry;
mod server;
#[cfg(test)]
pub mod testing;
mod types;
pub mod validate;

pub use anomaly::{Anomaly, WarnHook, WarnSink};
pub use batch::{BatchBuilder, BatchCallback, BatchStatus};
pub use client::{Client, ClientBuilder, RequestHandle};
pub use codec::{Codec, JsonCodec, SendHook};
pub use config::{ClientConfig, ServerConfig};
pub use error::{BoxError, JsonRpcError, Result};
pub use id::{CounterIdGenerator, IdGenerator, UuidIdGenerator};
pub use method::{Method, MethodError, MethodMap, Params};
pub use registry::{PendingRegistry, Settle};
pub use server::{Server, ServerBuilder};
pub use types::{
    ErrorCode, ErrorDetails, ErrorResponse, Id, JsonValue, Payload, Request, Response, ResponsePayload,
    SuccessResponse, TwoPointZero,
};
