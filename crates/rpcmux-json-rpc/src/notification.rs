use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::normalize_params;
use crate::types::JsonRpcVersion;

/// A JSON-RPC notification (request without an id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    pub params: Vec<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params: normalize_params(params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, to_string};

    #[test]
    fn test_notification_json_format() {
        let notification = JsonRpcNotification::new("ping", json!([]));
        let json_str = to_string(&notification).unwrap();

        // Should not contain an "id" field
        assert!(!json_str.contains("\"id\""));
        assert!(json_str.contains("\"jsonrpc\":\"2.0\""));
        assert!(json_str.contains("\"method\":\"ping\""));
    }
}
