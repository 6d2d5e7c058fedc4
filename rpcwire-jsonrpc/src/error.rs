use std::any::Any;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::batch::BatchStatus;
use crate::types::{ErrorDetails, Id};

pub type Result<T, E = JsonRpcError> = std::result::Result<T, E>;

/// Boxed error type used by pluggable collaborators (codecs, transports) whose concrete error
/// types this crate does not know about.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum JsonRpcError {
    #[error("Params for method '{method}' must be an array or an object")]
    InvalidParamsType { method: String },

    #[error("Error serializing request params {type_name} to JSON")]
    SerRequest {
        source: serde_json::Error,
        type_name: &'static str,
    },

    #[error("Error deserializing response into {type_name}")]
    DeserResponse {
        source: serde_json::Error,
        type_name: &'static str,
        response: JsonValue,
    },

    #[error("Error encoding payload")]
    Encode { source: BoxError },

    #[error("Error decoding payload")]
    Decode { source: BoxError },

    #[error("Method '{method}' returned error {}: {}", .error.code.code(), .error.message)]
    Remote { method: String, error: ErrorDetails },

    #[error("Request {id} for method '{method}' was abandoned after the internal timeout of {timeout:?}")]
    Timeout {
        method: String,
        id: Id,
        timeout: Duration,
    },

    #[error("Request ID {id} is already in use by a pending request")]
    DuplicateRequestId { id: Id },

    #[error("The client that owned this pending request was dropped before a response arrived")]
    PendingRequestDropped,

    #[error("The client has been destroyed")]
    ClientDestroyed,

    #[error("Cannot send an empty batch")]
    EmptyBatch,

    #[error("Batch was already sent (status {status}); it cannot be used any more")]
    BatchAlreadySent { status: BatchStatus },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("A Tokio runtime is required to run the pending request sweep")]
    NoAsyncRuntime,
}

impl JsonRpcError {
    /// True if this is the internal abandonment timeout, as opposed to an error reported by the
    /// remote peer or a local failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, JsonRpcError::Timeout { .. })
    }

    /// The error object sent back by the remote peer, if that is what this error is.
    pub fn remote_error(&self) -> Option<&ErrorDetails> {
        match self {
            JsonRpcError::Remote { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Render the payload of a caught panic as a string for logging.
pub(crate) fn panic_err_to_string(err: Box<dyn Any + Send + 'static>) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
