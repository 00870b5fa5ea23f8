//! Commonly used client types.
//!
//! ```rust
//! use rpcmux_client::prelude::*;
//! ```

pub use crate::{
    AuthType, Client, ClientAuth, ClientConfig, ClientError, ClientResult, Connection, HttpStream,
    RpcError, StreamEvent,
};
