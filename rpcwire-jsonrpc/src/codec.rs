//! Wire encoding of payloads.
//!
//! The engine only ever deals in [`JsonValue`] trees; a [`Codec`] turns those into the raw bytes
//! that the transport hooks carry, and back.  JSON text is the default, but anything that
//! round-trips a JSON value works.
use std::sync::Arc;

use serde::Serialize;

use crate::error::{BoxError, JsonRpcError, Result};
use crate::types::JsonValue;

/// Transport hook that receives each encoded outbound payload.
///
/// Invoked synchronously, once per payload; the engine never performs I/O itself.
pub type SendHook = Arc<dyn Fn(Vec<u8>) + Send + Sync + 'static>;

pub trait Codec: Send + Sync + 'static {
    fn serialize(&self, value: &JsonValue) -> Result<Vec<u8>, BoxError>;

    fn deserialize(&self, raw: &[u8]) -> Result<JsonValue, BoxError>;
}

/// Encode a payload model value with `codec`
pub(crate) fn encode<T: Serialize>(codec: &dyn Codec, payload: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(payload).map_err(|e| JsonRpcError::Encode { source: e.into() })?;
    codec
        .serialize(&value)
        .map_err(|source| JsonRpcError::Encode { source })
}

pub(crate) fn decode(codec: &dyn Codec, raw: &[u8]) -> Result<JsonValue> {
    codec
        .deserialize(raw)
        .map_err(|source| JsonRpcError::Decode { source })
}

/// JSON text, UTF-8 encoded
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn serialize(&self, value: &JsonValue) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, raw: &[u8]) -> Result<JsonValue, BoxError> {
        Ok(serde_json::from_slice(raw)?)
    }
}
