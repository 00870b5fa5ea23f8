//! # rpcmux Server Prelude
//!
//! ```rust
//! use rpcmux_server::prelude::*;
//! ```

pub use crate::auth::{
    AuthConfig, BasicAuthenticator, BasicFn, JwtValidator, StaticCredentials, TokenAuthenticator,
    TokenFn,
};
pub use crate::config::ServerConfig;
pub use crate::server::{ListenMode, RpcServer, RpcServerBuilder};
pub use crate::{Result, ServerError};

pub use rpcmux_json_rpc::prelude::*;
