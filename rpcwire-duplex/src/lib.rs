//! A JSON-RPC peer that is both client and server over one connection, and a small driver that
//! runs it over a message transport.
//!
//! The protocol engine in [`rpcwire_jsonrpc`] never performs I/O.  [`DuplexPeer`] binds one
//! [`Client`](rpcwire_jsonrpc::Client) and one [`Server`](rpcwire_jsonrpc::Server) to the same
//! outbound channel and routes each inbound message to whichever half it is meant for.
//! [`serve`] pumps that channel onto a [`Transport`] and feeds the transport's messages back to
//! the peer.
mod error;
mod peer;
#[cfg(test)]
mod testing;
mod transport;

pub use error::{DuplexError, Result};
pub use peer::{DEFAULT_DUPLEX_NAME, DuplexPeer, DuplexPeerBuilder};
pub use transport::{Transport, serve};
