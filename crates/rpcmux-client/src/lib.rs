//! # rpcmux Client
//!
//! Talks JSON-RPC 2.0 to an rpcmux server, or any peer using the same wire
//! format, over four transports:
//!
//! - **HTTP**: [`Client::call`] posts one request and returns its reply
//! - **Streaming HTTP**: [`Client::stream`] keeps reading the response as
//!   [`StreamEvent`]s
//! - **WebSocket**: [`Client::connect_websocket`]
//! - **Raw TCP**: [`Client::connect_socket`], with the in-band `auth` call
//!   sent first when credentials are set
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rpcmux_client::Client;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), rpcmux_client::ClientError> {
//! let mut client = Client::new("localhost", 8000)?;
//! client.basic_auth("user", "pass");
//!
//! let reply = client.call("echo", json!(["hello"])).await?;
//! assert_eq!(reply, json!("hello"));
//!
//! let conn = client.connect_socket().await?;
//! let reply = conn.call("echo", json!("again")).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod prelude;
pub mod streaming;
pub mod transport;

// Re-export main types
pub use auth::ClientAuth;
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use streaming::{HttpStream, StreamEvent};
pub use transport::TransportType;

// Re-export foundational types
pub use rpcmux_json_rpc::{AuthType, CallPolicy, Connection, RpcError};
