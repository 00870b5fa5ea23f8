//! Classification of decoded JSON values into JSON-RPC message kinds.
//!
//! Classification is pure and total: every value maps to exactly one
//! [`Message`] variant, and nothing here can fail or panic.

use serde_json::{Map, Value};

use crate::error::{ErrorObject, RpcError};
use crate::request::normalize_params;
use crate::types::RequestId;

/// An inbound request or notification
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCall {
    /// `None` for notifications, which are never answered
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Option<Value>,
}

impl IncomingCall {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Parameters in positional form; absent params are an empty list.
    pub fn positional_params(&self) -> Vec<Value> {
        match &self.params {
            None | Some(Value::Null) => Vec::new(),
            Some(params) => normalize_params(params.clone()),
        }
    }
}

/// An inbound response to one of our calls
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub id: RequestId,
    pub outcome: Result<Value, RpcError>,
}

/// Result of classifying one decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `method` present: a request (with id) or a notification (without)
    Call(IncomingCall),
    /// `id` present together with `result` or `error`
    Response(ResponseMessage),
    /// A request whose `id` is present but neither null, an `i64` nor a
    /// string. It cannot be answered by id, so it gets an `InvalidRequest`
    /// error with a null id.
    InvalidRequest(Value),
    /// Anything else, including responses whose id is unusable
    Malformed(Value),
}

/// Classify a decoded JSON value.
///
/// The response check runs first, so a message carrying `id`, `method` and
/// `result` is treated as a response.
pub fn classify(value: Value) -> Message {
    let Value::Object(map) = value else {
        return Message::Malformed(value);
    };

    if map.contains_key("id") && (map.contains_key("result") || map.contains_key("error")) {
        return classify_response(map);
    }

    match map.get("method") {
        Some(Value::String(method)) => {
            let id = match map.get("id") {
                None | Some(Value::Null) => None,
                Some(raw) => match RequestId::from_value(raw) {
                    Some(id) => Some(id),
                    None => return Message::InvalidRequest(Value::Object(map)),
                },
            };
            let method = method.clone();
            let params = map.get("params").cloned();
            Message::Call(IncomingCall { id, method, params })
        }
        _ => Message::Malformed(Value::Object(map)),
    }
}

fn classify_response(map: Map<String, Value>) -> Message {
    let Some(id) = map.get("id").and_then(RequestId::from_value) else {
        return Message::Malformed(Value::Object(map));
    };

    let outcome = match map.get("error") {
        Some(error) if !error.is_null() => {
            Err(RpcError::from_object(ErrorObject::from_value(error)))
        }
        _ => Ok(map.get("result").cloned().unwrap_or(Value::Null)),
    };

    Message::Response(ResponseMessage { id, outcome })
}
