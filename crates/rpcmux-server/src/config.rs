use std::collections::BTreeMap;
use std::net::SocketAddr;

use http::{HeaderMap, HeaderName, HeaderValue};
use rpcmux_json_rpc::CallPolicy;
use rpcmux_json_rpc::framer::DEFAULT_MAX_BUFFERED;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Configuration shared by every listener of an [`RpcServer`](crate::RpcServer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the `listen_*` helpers bind to
    pub bind_address: SocketAddr,
    /// Maximum HTTP request body size
    pub max_body_size: usize,
    /// Extra headers merged into every HTTP response, overriding defaults
    pub headers: BTreeMap<String, String>,
    /// Accept WebSocket upgrades on the HTTP listener
    pub websocket: bool,
    /// Maximum bytes buffered for one incomplete JSON value on a stream
    pub max_frame_size: usize,
    /// Deadline for calls the server makes back to its peers
    pub call_policy: CallPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            max_body_size: 1024 * 1024, // 1MB
            headers: BTreeMap::new(),
            websocket: true,
            max_frame_size: DEFAULT_MAX_BUFFERED,
            call_policy: CallPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Validate and convert the custom headers.
    pub fn header_map(&self) -> Result<HeaderMap, ServerError> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| ServerError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| ServerError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_body_size, 1024 * 1024);
        assert!(config.websocket);
        assert_eq!(config.bind_address.port(), 8000);
        assert!(config.header_map().unwrap().is_empty());
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: ServerConfig = serde_json::from_value(json!({
            "bind_address": "0.0.0.0:9000",
            "headers": {"Access-Control-Allow-Origin": "*"},
            "call_policy": {"timeout_ms": 500}
        }))
        .unwrap();

        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.max_body_size, 1024 * 1024);
        assert_eq!(
            config.call_policy.timeout,
            Some(std::time::Duration::from_millis(500))
        );
        assert_eq!(
            config.header_map().unwrap().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let mut config = ServerConfig::default();
        config.headers.insert("bad header".into(), "x".into());
        assert!(matches!(
            config.header_map(),
            Err(ServerError::InvalidHeader { .. })
        ));
    }
}
