//! # rpcmux Server
//!
//! Serves a JSON-RPC 2.0 [`Endpoint`](rpcmux_json_rpc::Endpoint) over several
//! transports from one configuration:
//!
//! - **HTTP**: one request per POST, optionally kept open as a stream
//! - **WebSocket**: upgrade of the HTTP listener, full duplex
//! - **Raw TCP**: concatenated JSON values with an in-band `auth` handshake
//! - **Hybrid**: HTTP and raw TCP on one port, told apart by the first byte
//!
//! Every transport shares the same [`AuthConfig`] and reports authentication
//! failures identically, as `InvalidParams` with the message `"Unauthorized"`.

pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod handler;
pub mod hybrid;
pub mod prelude;
pub mod raw;
pub mod server;
pub mod websocket;

// Re-export main types
pub use auth::{
    AuthConfig, BasicAuthenticator, BasicFn, JwtValidator, StaticCredentials, TokenAuthenticator,
    TokenFn,
};
pub use config::ServerConfig;
pub use error::ServerError;
pub use hybrid::{Protocol, Rewind, classify_first_byte};
pub use server::{ListenMode, RpcServer, RpcServerBuilder};

// Re-export foundational types
pub use rpcmux_json_rpc::{AuthType, CallContext, Connection, Endpoint, MethodRegistry, RpcError};

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
