//! The `warn` side-channel.
//!
//! Inbound garbage and misbehaving methods are not local faults: the engine never fails because
//! of them.  Each occurrence is logged with `tracing` and handed to an optional user hook as an
//! [`Anomaly`].
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::BoxError;
use crate::types::{ErrorDetails, JsonValue};

/// User callback that observes anomalies.
pub type WarnHook = Arc<dyn Fn(&Anomaly) + Send + Sync + 'static>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Anomaly {
    #[error("Inbound payload could not be decoded")]
    Undecodable { source: BoxError },

    #[error("Inbound response is not a valid JSON-RPC response: {response}")]
    InvalidResponse { response: JsonValue },

    #[error("Inbound response batch is empty")]
    EmptyResponseBatch,

    #[error("Response received after the client was destroyed: {response}")]
    ResponseAfterDestroy { response: JsonValue },

    #[error("Method '{method}' failed: {error:#}")]
    MethodFailed { method: String, error: anyhow::Error },

    #[error("Method '{method}' panicked: {message}")]
    MethodPanicked { method: String, message: String },

    #[error("Method '{method}' returned error code {} outside the reserved ranges", .error.code.code())]
    UnreservedErrorCode { method: String, error: ErrorDetails },

    #[error("Outbound payload could not be encoded")]
    Unencodable { source: BoxError },
}

/// Where anomalies go: always `tracing`, plus the user hook if there is one.
#[derive(Clone, Default)]
pub struct WarnSink {
    hook: Option<WarnHook>,
}

impl WarnSink {
    pub fn new(hook: impl Fn(&Anomaly) + Send + Sync + 'static) -> Self {
        Self {
            hook: Some(Arc::new(hook)),
        }
    }

    pub(crate) fn report(&self, peer: &str, anomaly: Anomaly) {
        match &anomaly {
            Anomaly::Unencodable { .. } => {
                tracing::error!(peer, error = %anomaly, "Failed to encode outbound payload");
            }
            _ => {
                tracing::warn!(peer, anomaly = %anomaly, "JSON-RPC anomaly");
            }
        }

        if let Some(hook) = &self.hook {
            hook(&anomaly);
        }
    }
}

impl fmt::Debug for WarnSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarnSink")
            .field("hook", &self.hook.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl From<WarnHook> for WarnSink {
    fn from(hook: WarnHook) -> Self {
        Self { hook: Some(hook) }
    }
}
