//! # JSON-RPC 2.0 Engine
//!
//! The transport-agnostic core shared by the `rpcmux` server and client.
//! Nothing in this crate binds sockets; transports plug in through
//! [`MessageSink`] and feed inbound bytes through the [`Framer`].
//!
//! ## Features
//! - Incremental framing of concatenated or split JSON values
//! - Message classification (request, notification, response, malformed)
//! - [`Connection`] with a per-connection pending-call table and call deadlines
//! - Closed error taxonomy with fixed JSON-RPC codes
//! - Shared authentication vocabulary for the header and in-band strategies

pub mod auth;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod framer;
pub mod message;
pub mod notification;
pub mod prelude;
pub mod request;
pub mod response;
pub mod types;

// Re-export main types
pub use auth::{AuthType, BasicCredentials};
pub use connection::{
    CallPolicy, ChannelSink, Connection, ConnectionBuilder, ConnectionStats, MessageSink,
    UnsupportedSink,
};
pub use endpoint::{CallContext, Endpoint, MethodRegistry};
pub use error::{CallError, ConnectionError, ErrorObject, RpcError};
pub use framer::{Framer, JsonCodec};
pub use message::{IncomingCall, Message, ResponseMessage, classify};
pub use notification::JsonRpcNotification;
pub use request::{JsonRpcRequest, normalize_params};
pub use response::{JsonRpcErrorResponse, JsonRpcResponse, Reply};
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the in-band raw socket login call
pub const AUTH_METHOD: &str = "auth";

/// Message carried by every authentication failure, on every transport
pub const UNAUTHORIZED: &str = "Unauthorized";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Also used to signal an unauthorized request.
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Boxed error returned by user-supplied handlers and authenticators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
