use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonRpcVersion, RequestId};

/// Normalize call parameters to positional form. Arrays pass through
/// unchanged; any other value becomes a single-element array, so
/// `"hi"` is sent as `["hi"]`.
pub fn normalize_params(params: Value) -> Vec<Value> {
    match params {
        Value::Array(values) => values,
        other => vec![other],
    }
}

/// An outbound JSON-RPC request expecting a reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    pub params: Vec<Value>,
    pub id: RequestId,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params: normalize_params(params),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_string};

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(RequestId::Number(1), "echo", json!(["a", 1]));

        let json = to_string(&request).unwrap();
        let parsed: JsonRpcRequest = from_str(&json).unwrap();

        assert_eq!(parsed, request);
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
    }

    #[test]
    fn test_scalar_params_are_wrapped() {
        let request = JsonRpcRequest::new(RequestId::Number(3), "echo", json!("hi"));
        assert_eq!(request.params, vec![json!("hi")]);

        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["params"], json!(["hi"]));
    }

    #[test]
    fn test_object_params_are_wrapped() {
        assert_eq!(
            normalize_params(json!({"a": 1})),
            vec![json!({"a": 1})]
        );
        assert_eq!(normalize_params(json!([1, 2])), vec![json!(1), json!(2)]);
    }
}
