//! Transport-agnostic JSON-RPC 2.0.
//!
//! Everything lives in [`jsonrpc`], re-exported here at the top level; the `duplex` feature
//! (on by default) adds [`duplex`] for connections where both ends make calls.
pub use rpcwire_jsonrpc as jsonrpc;
pub use rpcwire_jsonrpc::*;

#[cfg(feature = "duplex")]
pub use rpcwire_duplex as duplex;
