use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorObject, RpcError};
use crate::types::{JsonRpcVersion, RequestId};

/// A successful JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            result,
        }
    }
}

/// An error response. `id` is serialized as `null` when the failing request
/// could not be identified (parse errors, rejected HTTP requests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub error: ErrorObject,
    pub id: Option<RequestId>,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: &RpcError) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            error: error.to_object(),
            id,
        }
    }
}

/// Either kind of reply, keeping success and error members separate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Success(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

impl Reply {
    pub fn from_outcome(id: RequestId, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => Reply::Success(JsonRpcResponse::success(id, result)),
            Err(err) => Reply::Error(JsonRpcErrorResponse::new(Some(id), &err)),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Reply::Success(resp) => Some(&resp.id),
            Reply::Error(err) => err.id.as_ref(),
        }
    }
}
