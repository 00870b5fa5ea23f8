//! Commonly used types, for glob import.
//!
//! ```rust
//! use rpcmux_json_rpc::prelude::*;
//! ```

pub use crate::auth::{AuthType, BasicCredentials};
pub use crate::connection::{CallPolicy, ChannelSink, Connection, MessageSink};
pub use crate::endpoint::{CallContext, Endpoint, MethodRegistry};
pub use crate::error::{CallError, ConnectionError, RpcError};
pub use crate::framer::{Framer, JsonCodec};
pub use crate::message::{IncomingCall, Message};
pub use crate::types::RequestId;
pub use crate::{BoxError, error_codes};
