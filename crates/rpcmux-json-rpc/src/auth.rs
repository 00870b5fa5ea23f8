//! Authentication vocabulary shared by the server gate and the client.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The active authentication strategy of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Cookie,
    Jwt,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Basic => "basic",
            AuthType::Cookie => "cookie",
            AuthType::Jwt => "jwt",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AuthType::None),
            "basic" => Ok(AuthType::Basic),
            "cookie" => Ok(AuthType::Cookie),
            "jwt" | "bearer" => Ok(AuthType::Jwt),
            other => Err(format!("unknown auth type: {}", other)),
        }
    }
}

/// Username/password pair carried by Basic auth and the in-band handshake
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Basic base64(username:password)`
    pub fn to_header_value(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {}", encoded)
    }

    /// Decode the base64 token of a Basic header. The decoded text is split on
    /// the first `:`, so passwords may themselves contain colons. A token
    /// without a colon yields an empty password.
    pub fn from_token(token: &str) -> Option<Self> {
        let decoded = STANDARD.decode(token.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));
        Some(Self::new(username, password))
    }
}

// Never print the password.
impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Last whitespace-delimited token of a header value, so both
/// `Basic abc` and a bare `abc` yield `abc`.
pub fn last_token(header_value: &str) -> Option<&str> {
    header_value.split_whitespace().next_back()
}

/// `Bearer <token>`
pub fn bearer_header_value(token: &str) -> String {
    format!("Bearer {}", token)
}
