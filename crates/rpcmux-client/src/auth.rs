//! Client-side credentials

use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE, HeaderValue};
use rpcmux_json_rpc::auth::bearer_header_value;
use rpcmux_json_rpc::{AuthType, BasicCredentials};
use serde_json::{Value, json};

use crate::error::{ClientError, ClientResult};

/// Active authentication type plus one credential slot per type.
///
/// Setting credentials makes their type active. Switching the type keeps
/// every slot, so a client can move between types without re-entering them.
#[derive(Debug, Clone, Default)]
pub struct ClientAuth {
    auth_type: AuthType,
    basic: Option<BasicCredentials>,
    cookie: Option<String>,
    jwt: Option<String>,
}

impl ClientAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty usernames or passwords are ignored.
    pub fn basic(&mut self, username: impl Into<String>, password: impl Into<String>) {
        let (username, password) = (username.into(), password.into());
        if username.is_empty() || password.is_empty() {
            return;
        }
        self.basic = Some(BasicCredentials::new(username, password));
        self.auth_type = AuthType::Basic;
    }

    /// The value is sent verbatim as the `Cookie` header.
    pub fn cookie(&mut self, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.cookie = Some(value);
        self.auth_type = AuthType::Cookie;
    }

    pub fn jwt(&mut self, token: impl Into<String>) {
        let token = token.into();
        if token.is_empty() {
            return;
        }
        self.jwt = Some(token);
        self.auth_type = AuthType::Jwt;
    }

    pub fn set_auth_type(&mut self, auth_type: AuthType) {
        self.auth_type = auth_type;
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn basic_credentials(&self) -> Option<&BasicCredentials> {
        self.basic.as_ref()
    }

    /// Set the headers of the active type. [`AuthType::None`] removes both
    /// `Authorization` and `Cookie`.
    pub fn apply(&self, headers: &mut HeaderMap) -> ClientResult<()> {
        match self.auth_type {
            AuthType::Basic => {
                if let Some(credentials) = &self.basic {
                    headers.insert(AUTHORIZATION, header_value(&credentials.to_header_value())?);
                }
            }
            AuthType::Cookie => {
                if let Some(cookie) = &self.cookie {
                    headers.insert(COOKIE, header_value(cookie)?);
                }
            }
            AuthType::Jwt => {
                if let Some(token) = &self.jwt {
                    headers.insert(AUTHORIZATION, header_value(&bearer_header_value(token))?);
                }
            }
            AuthType::None => {
                headers.remove(AUTHORIZATION);
                headers.remove(COOKIE);
            }
        }
        Ok(())
    }

    /// Params of the in-band `auth` call opening a raw socket, if the active
    /// type has credentials.
    pub fn handshake_params(&self) -> Option<Value> {
        match self.auth_type {
            AuthType::Basic => self
                .basic
                .as_ref()
                .map(|credentials| json!([credentials.username, credentials.password])),
            AuthType::Cookie => self.cookie.as_ref().map(|cookie| json!([cookie, ""])),
            AuthType::Jwt => self.jwt.as_ref().map(|token| json!([token, ""])),
            AuthType::None => None,
        }
    }
}

fn header_value(value: &str) -> ClientResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| ClientError::InvalidHeader {
        name: "authorization".into(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header() {
        let mut auth = ClientAuth::new();
        auth.basic("user", "pass");

        let mut headers = HeaderMap::new();
        auth.apply(&mut headers).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic dXNlcjpwYXNz");
        assert_eq!(auth.handshake_params(), Some(json!(["user", "pass"])));
    }

    #[test]
    fn test_empty_credentials_ignored() {
        let mut auth = ClientAuth::new();
        auth.basic("user", "");
        auth.cookie("");
        assert_eq!(auth.auth_type(), AuthType::None);
        assert!(auth.basic_credentials().is_none());
    }

    #[test]
    fn test_switching_keeps_slots() {
        let mut auth = ClientAuth::new();
        auth.basic("user", "pass");
        auth.jwt("token-1");
        assert_eq!(auth.auth_type(), AuthType::Jwt);

        let mut headers = HeaderMap::new();
        auth.apply(&mut headers).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer token-1");

        auth.set_auth_type(AuthType::Basic);
        auth.apply(&mut headers).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_none_removes_headers() {
        let mut auth = ClientAuth::new();
        auth.cookie("session=abc");

        let mut headers = HeaderMap::new();
        auth.apply(&mut headers).unwrap();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic stale"));

        auth.set_auth_type(AuthType::None);
        auth.apply(&mut headers).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(headers.get(COOKIE).is_none());
        assert!(auth.handshake_params().is_none());

        // Slots survive; switching back restores the cookie
        auth.set_auth_type(AuthType::Cookie);
        auth.apply(&mut headers).unwrap();
        assert_eq!(headers.get(COOKIE).unwrap(), "session=abc");
    }
}
