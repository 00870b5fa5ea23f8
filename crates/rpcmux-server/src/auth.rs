//! Authentication gate shared by all transports.
//!
//! HTTP requests and WebSocket upgrades are checked from their headers.
//! Raw sockets have no headers, so they authenticate in-band with an
//! `auth` call carrying two positional parameters.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderMap;
use http::header::{AUTHORIZATION, COOKIE};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rpcmux_json_rpc::auth::last_token;
use rpcmux_json_rpc::{AuthType, BasicCredentials, BoxError};
use serde_json::Value;
use tracing::debug;

/// Decides whether a username/password pair is admitted
#[async_trait]
pub trait BasicAuthenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<bool, BoxError>;
}

/// Decides whether a cookie value or bearer token is admitted
#[async_trait]
pub trait TokenAuthenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<bool, BoxError>;
}

/// A single fixed username and password
#[derive(Clone)]
pub struct StaticCredentials {
    credentials: BasicCredentials,
}

impl StaticCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: BasicCredentials::new(username, password),
        }
    }
}

#[async_trait]
impl BasicAuthenticator for StaticCredentials {
    async fn authenticate(&self, username: &str, password: &str) -> Result<bool, BoxError> {
        Ok(self.credentials.username == username && self.credentials.password == password)
    }
}

/// Adapter turning an async closure into a [`BasicAuthenticator`]
pub struct BasicFn<F>(pub F);

#[async_trait]
impl<F, Fut> BasicAuthenticator for BasicFn<F>
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send,
{
    async fn authenticate(&self, username: &str, password: &str) -> Result<bool, BoxError> {
        (self.0)(username.to_string(), password.to_string()).await
    }
}

/// Adapter turning an async closure into a [`TokenAuthenticator`]
pub struct TokenFn<F>(pub F);

#[async_trait]
impl<F, Fut> TokenAuthenticator for TokenFn<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send,
{
    async fn authenticate(&self, token: &str) -> Result<bool, BoxError> {
        (self.0)(token.to_string()).await
    }
}

/// Bearer token validator for HMAC-signed JWTs.
///
/// Signature, `exp` and any configured audience or issuer are checked; the
/// claims themselves are not inspected further.
#[derive(Clone)]
pub struct JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    /// HS256 validator for `secret`
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn with_audience(mut self, audience: &[&str]) -> Self {
        self.validation.set_audience(audience);
        self
    }

    pub fn with_issuer(mut self, issuer: &[&str]) -> Self {
        self.validation.set_issuer(issuer);
        self
    }
}

#[async_trait]
impl TokenAuthenticator for JwtValidator {
    async fn authenticate(&self, token: &str) -> Result<bool, BoxError> {
        match jsonwebtoken::decode::<Value>(token, &self.key, &self.validation) {
            Ok(_) => Ok(true),
            Err(err) => {
                debug!(error = %err, "Rejected bearer token");
                Ok(false)
            }
        }
    }
}

/// Active authentication type plus one handler slot per type.
///
/// Enabling a type makes it active. [`set_auth_type`](Self::set_auth_type)
/// switches between types that were enabled before and never clears a slot.
#[derive(Clone, Default)]
pub struct AuthConfig {
    auth_type: AuthType,
    basic: Option<Arc<dyn BasicAuthenticator>>,
    cookie: Option<Arc<dyn TokenAuthenticator>>,
    jwt: Option<Arc<dyn TokenAuthenticator>>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("auth_type", &self.auth_type)
            .field("basic", &self.basic.is_some())
            .field("cookie", &self.cookie.is_some())
            .field("jwt", &self.jwt.is_some())
            .finish()
    }
}

impl AuthConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_basic(&mut self, authenticator: Arc<dyn BasicAuthenticator>) {
        self.basic = Some(authenticator);
        self.auth_type = AuthType::Basic;
    }

    pub fn enable_cookie(&mut self, authenticator: Arc<dyn TokenAuthenticator>) {
        self.cookie = Some(authenticator);
        self.auth_type = AuthType::Cookie;
    }

    pub fn enable_jwt(&mut self, authenticator: Arc<dyn TokenAuthenticator>) {
        self.jwt = Some(authenticator);
        self.auth_type = AuthType::Jwt;
    }

    pub fn set_auth_type(&mut self, auth_type: AuthType) {
        self.auth_type = auth_type;
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    /// Whether the active type has a handler. Without one every request is
    /// admitted.
    pub fn requires_auth(&self) -> bool {
        match self.auth_type {
            AuthType::None => false,
            AuthType::Basic => self.basic.is_some(),
            AuthType::Cookie => self.cookie.is_some(),
            AuthType::Jwt => self.jwt.is_some(),
        }
    }

    /// Header strategy used by HTTP requests and WebSocket upgrades.
    pub async fn check_headers(&self, headers: &HeaderMap) -> bool {
        match self.auth_type {
            AuthType::None => true,
            AuthType::Basic => {
                let Some(handler) = &self.basic else {
                    return true;
                };
                let header = header_str(headers, AUTHORIZATION);
                let Some(credentials) = BasicCredentials::from_token(last_token(header).unwrap_or(""))
                else {
                    debug!("Malformed Basic authorization header");
                    return false;
                };
                admitted(
                    handler
                        .authenticate(&credentials.username, &credentials.password)
                        .await,
                )
            }
            AuthType::Cookie => match &self.cookie {
                Some(handler) => admitted(handler.authenticate(header_str(headers, COOKIE)).await),
                None => true,
            },
            AuthType::Jwt => match &self.jwt {
                Some(handler) => {
                    let token = last_token(header_str(headers, AUTHORIZATION)).unwrap_or("");
                    admitted(handler.authenticate(token).await)
                }
                None => true,
            },
        }
    }

    /// In-band strategy used by raw sockets. `params` must hold exactly two
    /// strings: username and password for Basic, or the cookie value or
    /// token followed by an ignored second element for Cookie and JWT.
    pub async fn check_handshake(&self, params: &[Value]) -> bool {
        let [first, second] = params else {
            return false;
        };
        let (Some(first), Some(second)) = (first.as_str(), second.as_str()) else {
            return false;
        };

        match self.auth_type {
            AuthType::None => true,
            AuthType::Basic => match &self.basic {
                Some(handler) => admitted(handler.authenticate(first, second).await),
                None => true,
            },
            AuthType::Cookie => match &self.cookie {
                Some(handler) => admitted(handler.authenticate(first).await),
                None => true,
            },
            AuthType::Jwt => match &self.jwt {
                Some(handler) => admitted(handler.authenticate(first).await),
                None => true,
            },
        }
    }
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

// A failing handler counts as a rejection.
fn admitted(outcome: Result<bool, BoxError>) -> bool {
    match outcome {
        Ok(admitted) => admitted,
        Err(err) => {
            debug!(error = %err, "Authentication handler failed");
            false
        }
    }
}
