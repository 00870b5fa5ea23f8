//! Error types for client operations

use rpcmux_json_rpc::{CallError, ConnectionError, RpcError};
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a JSON-RPC error object
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The local connection failed before an answer arrived
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-200 status; the body is kept for diagnostics
    #[error("\"{status}\"{body}")]
    Status { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    /// The response ended without a message answering the request
    #[error("Response ended without a reply")]
    MissingReply,
}

impl ClientError {
    /// The wire error when the server rejected the call
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.as_rpc().is_some_and(RpcError::is_unauthorized)
    }
}

impl From<CallError> for ClientError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Rpc(err) => Self::Rpc(err),
            CallError::Connection(err) => Self::Connection(err),
        }
    }
}
