use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::error_codes;
use crate::types::RequestId;

/// The closed set of JSON-RPC error kinds exchanged on the wire.
///
/// Every failure that leaves a transport boundary is converted into one of
/// these variants. `InvalidParams` is dual-use: it also carries the
/// `"Unauthorized"` signal produced by the auth gate, which keeps the wire
/// format compatible with existing peers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    /// A code outside the standard set, received from a peer
    #[error("JSON-RPC error {code}: {message}")]
    Other { code: i64, message: String },
}

impl RpcError {
    /// The authentication failure every transport reports
    pub fn unauthorized() -> Self {
        RpcError::InvalidParams(crate::UNAUTHORIZED.to_string())
    }

    pub fn code(&self) -> i64 {
        match self {
            RpcError::ParseError(_) => error_codes::PARSE_ERROR,
            RpcError::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            RpcError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            RpcError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            RpcError::InternalError(_) => error_codes::INTERNAL_ERROR,
            RpcError::Other { code, .. } => *code,
        }
    }

    /// The human-readable message placed in the wire `error.message` field
    pub fn message(&self) -> &str {
        match self {
            RpcError::ParseError(m)
            | RpcError::InvalidRequest(m)
            | RpcError::MethodNotFound(m)
            | RpcError::InvalidParams(m)
            | RpcError::InternalError(m) => m,
            RpcError::Other { message, .. } => message,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RpcError::InvalidParams(m) if m == crate::UNAUTHORIZED)
    }

    pub fn to_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.code(),
            message: self.message().to_string(),
            data: None,
        }
    }

    /// Map a wire error object back onto the taxonomy.
    pub fn from_object(object: ErrorObject) -> Self {
        let ErrorObject { code, message, .. } = object;
        match code {
            error_codes::PARSE_ERROR => RpcError::ParseError(message),
            error_codes::INVALID_REQUEST => RpcError::InvalidRequest(message),
            error_codes::METHOD_NOT_FOUND => RpcError::MethodNotFound(message),
            error_codes::INVALID_PARAMS => RpcError::InvalidParams(message),
            error_codes::INTERNAL_ERROR => RpcError::InternalError(message),
            code => RpcError::Other { code, message },
        }
    }

    /// Convert a handler failure into a wire error. Errors that already are
    /// an `RpcError` keep their kind; anything else becomes `InternalError`
    /// so peers never see unrecognized failures.
    pub fn from_handler_error(err: crate::BoxError) -> Self {
        match err.downcast::<RpcError>() {
            Ok(rpc) => *rpc,
            Err(other) => RpcError::InternalError(other.to_string()),
        }
    }
}

/// JSON-RPC error object as it appears in the `error` member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Read a peer's `error` member. Older peers send a bare string instead
    /// of an object; that is treated as an internal error with the string as
    /// its message.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => ErrorObject {
                code: map
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(error_codes::INTERNAL_ERROR),
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                data: map.get("data").cloned(),
            },
            Value::String(message) => ErrorObject {
                code: error_codes::INTERNAL_ERROR,
                message: message.clone(),
                data: None,
            },
            other => ErrorObject {
                code: error_codes::INTERNAL_ERROR,
                message: other.to_string(),
                data: None,
            },
        }
    }
}

impl From<RpcError> for ErrorObject {
    fn from(err: RpcError) -> Self {
        err.to_object()
    }
}

/// Failures of the local connection, independent of what the peer replied
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Tried to write data on unsupported connection type")]
    UnsupportedOperation,

    #[error("Connection closed")]
    Closed,

    #[error("Call {id} ({method}) timed out after {after:?}")]
    Timeout {
        method: String,
        id: RequestId,
        after: Duration,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a failed outbound call
#[derive(Debug, Error)]
pub enum CallError {
    /// The peer answered with an error object
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// No answer could be obtained
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl CallError {
    pub fn as_rpc(&self) -> Option<&RpcError> {
        match self {
            CallError::Rpc(err) => Some(err),
            CallError::Connection(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(RpcError::ParseError(String::new()).code(), -32700);
        assert_eq!(RpcError::InvalidRequest(String::new()).code(), -32600);
        assert_eq!(RpcError::MethodNotFound(String::new()).code(), -32601);
        assert_eq!(RpcError::InvalidParams(String::new()).code(), -32602);
        assert_eq!(RpcError::InternalError(String::new()).code(), -32603);
    }

    #[test]
    fn test_unauthorized_is_invalid_params() {
        let err = RpcError::unauthorized();
        assert_eq!(err.code(), error_codes::INVALID_PARAMS);
        assert_eq!(err.message(), "Unauthorized");
        assert!(err.is_unauthorized());
    }

    #[test]
    fn test_object_round_trip_keeps_kind() {
        let object = RpcError::MethodNotFound("nope".into()).to_object();
        assert_eq!(
            RpcError::from_object(object),
            RpcError::MethodNotFound("nope".into())
        );

        let custom = ErrorObject {
            code: -32001,
            message: "custom".into(),
            data: None,
        };
        assert_eq!(
            RpcError::from_object(custom),
            RpcError::Other {
                code: -32001,
                message: "custom".into()
            }
        );
    }

    #[test]
    fn test_handler_error_wrapping() {
        let known: crate::BoxError = Box::new(RpcError::InvalidParams("bad".into()));
        assert_eq!(
            RpcError::from_handler_error(known),
            RpcError::InvalidParams("bad".into())
        );

        let unknown: crate::BoxError = "disk on fire".into();
        assert_eq!(
            RpcError::from_handler_error(unknown),
            RpcError::InternalError("disk on fire".into())
        );
    }

    #[test]
    fn test_error_object_from_legacy_string() {
        let object = ErrorObject::from_value(&json!("Error: Unauthorized"));
        assert_eq!(object.code, error_codes::INTERNAL_ERROR);
        assert_eq!(object.message, "Error: Unauthorized");
    }
}
