//! Configuration types for the client

use std::collections::BTreeMap;
use std::time::Duration;

use rpcmux_json_rpc::CallPolicy;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ClientResult;

/// Where the server lives and how to talk to it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or address. A `ws://` or `wss://` URL is used verbatim for
    /// WebSocket connections.
    pub host: String,

    pub port: u16,

    /// HTTP request path
    pub path: String,

    /// Use `https`/`wss` instead of `http`/`ws`
    pub https: bool,

    /// Timeout of one-shot HTTP calls
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Deadline of calls made over WebSocket and raw socket connections
    pub call_policy: CallPolicy,

    /// Extra headers sent with every HTTP request and WebSocket handshake
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            path: "/".to_string(),
            https: false,
            request_timeout: Duration::from_secs(30),
            call_policy: CallPolicy::default(),
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Target of HTTP calls
    pub fn http_url(&self) -> ClientResult<Url> {
        let scheme = if self.https { "https" } else { "http" };
        Ok(Url::parse(&format!(
            "{}://{}:{}{}",
            scheme,
            self.host,
            self.port,
            normalized_path(&self.path)
        ))?)
    }

    /// Target of WebSocket connections
    pub fn websocket_url(&self) -> ClientResult<Url> {
        let lower = self.host.to_ascii_lowercase();
        if lower.starts_with("ws://") || lower.starts_with("wss://") {
            return Ok(Url::parse(&self.host)?);
        }

        let scheme = if self.https { "wss" } else { "ws" };
        Ok(Url::parse(&format!(
            "{}://{}:{}{}",
            scheme,
            self.host,
            self.port,
            normalized_path(&self.path)
        ))?)
    }
}

fn normalized_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
