use rpcwire_jsonrpc::{BoxError, JsonRpcError};
use thiserror::Error;

pub type Result<T, E = DuplexError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DuplexError {
    #[error("Duplex peer has been destroyed")]
    Destroyed,

    #[error(transparent)]
    JsonRpc {
        #[from]
        source: JsonRpcError,
    },

    #[error("Transport error")]
    Transport { source: BoxError },

    #[error("Outbound payload is not UTF-8 text and can't be written to a line transport")]
    NotText { source: std::string::FromUtf8Error },
}

impl DuplexError {
    pub(crate) fn transport(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        DuplexError::Transport {
            source: Box::new(source),
        }
    }
}
