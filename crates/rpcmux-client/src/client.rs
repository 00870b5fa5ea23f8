//! JSON-RPC client over one-shot HTTP, streaming HTTP, WebSocket and raw TCP

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use http::HeaderMap;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use rpcmux_json_rpc::{
    AUTH_METHOD, AuthType, BoxError, CallContext, Connection, ConnectionBuilder, ErrorObject,
    JsonRpcRequest, MessageSink, MethodRegistry, RequestId, RpcError,
};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::ClientAuth;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::streaming::HttpStream;
use crate::transport::{TransportType, attach_socket, attach_websocket};

/// Id of the single request an HTTP exchange carries
const HTTP_REQUEST_ID: i64 = 1;

/// JSON-RPC client.
///
/// HTTP calls are independent requests. [`connect_websocket`] and
/// [`connect_socket`] open a persistent [`Connection`] on which both sides
/// may call each other; methods registered with [`expose`] answer the
/// server's calls.
///
/// [`connect_websocket`]: Client::connect_websocket
/// [`connect_socket`]: Client::connect_socket
/// [`expose`]: Client::expose
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    auth: ClientAuth,
    registry: MethodRegistry,
    http: reqwest::Client,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("auth", &self.auth)
            .field("methods", &self.registry.methods())
            .finish()
    }
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(host, port))
    }

    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("rpcmux-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            config,
            auth: ClientAuth::new(),
            registry: MethodRegistry::new(),
            http,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &ClientAuth {
        &self.auth
    }

    /// Send `Authorization: Basic ..` from now on
    pub fn basic_auth(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.auth.basic(username, password);
    }

    /// Send `Cookie: <value>` from now on
    pub fn cookie_auth(&mut self, value: impl Into<String>) {
        self.auth.cookie(value);
    }

    /// Send `Authorization: Bearer <token>` from now on
    pub fn jwt_auth(&mut self, token: impl Into<String>) {
        self.auth.jwt(token);
    }

    pub fn set_auth_type(&mut self, auth_type: AuthType) {
        self.auth.set_auth_type(auth_type);
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth.auth_type()
    }

    /// Answer calls the server makes over a persistent connection
    pub fn expose<F, Fut, E>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.registry.expose(name, handler);
        self
    }

    fn request_headers(&self) -> ClientResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.config.headers {
            let invalid = |reason: String| ClientError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            headers.insert(name, value);
        }
        self.auth.apply(&mut headers)?;
        Ok(headers)
    }

    async fn post(&self, method: &str, params: Value) -> ClientResult<reqwest::Response> {
        let request = JsonRpcRequest::new(RequestId::Number(HTTP_REQUEST_ID), method, params);
        let body = serde_json::to_vec(&request)?;
        let mut headers = self.request_headers()?;
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        debug!(method = %method, "--> HTTP call");
        let response = self
            .http
            .post(self.config.http_url()?)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "HTTP call failed");
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// One request, one reply. Scalar params are sent as a one-element array.
    pub async fn call(&self, method: &str, params: Value) -> ClientResult<Value> {
        let response = self.post(method, params).await?;
        let bytes = response.bytes().await?;
        let mut decoded: Value = serde_json::from_slice(&bytes)?;

        // Gate and protocol errors come back with a null id
        if let Some(error) = decoded.get("error").filter(|error| !error.is_null()) {
            return Err(RpcError::from_object(ErrorObject::from_value(error)).into());
        }
        decoded
            .get_mut("result")
            .map(Value::take)
            .ok_or(ClientError::MissingReply)
    }

    /// Post one request and keep reading the response body as events.
    pub async fn stream(&self, method: &str, params: Value) -> ClientResult<HttpStream> {
        let response = self.post(method, params).await?;
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));
        Ok(HttpStream::new(RequestId::Number(HTTP_REQUEST_ID), body))
    }

    fn connection_builder(
        &self,
        transport: TransportType,
    ) -> impl FnOnce(Arc<dyn MessageSink>) -> ConnectionBuilder {
        let endpoint = Arc::new(self.registry.clone());
        let policy = self.config.call_policy;
        let label = format!("{}-{}", transport, Uuid::now_v7());
        move |sink| {
            Connection::builder(sink)
                .endpoint(endpoint)
                .policy(policy)
                .label(label)
        }
    }

    /// Open a WebSocket. Auth headers go with the handshake.
    pub async fn connect_websocket(&self) -> ClientResult<Connection> {
        let url = self.config.websocket_url()?;
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().extend(self.request_headers()?);

        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        info!(url = %url, status = response.status().as_u16(), "WebSocket connected");

        Ok(attach_websocket(ws, self.connection_builder(TransportType::WebSocket)))
    }

    /// Open a raw TCP connection. When the active auth type has credentials
    /// the first call is the in-band `auth` handshake, and a rejected
    /// handshake fails the connect.
    pub async fn connect_socket(&self) -> ClientResult<Connection> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        stream.set_nodelay(true)?;
        let conn = attach_socket(stream, self.connection_builder(TransportType::Socket));
        info!(host = %self.config.host, port = self.config.port, "Socket connected");

        if let Some(params) = self.auth.handshake_params() {
            if let Err(err) = conn.call(AUTH_METHOD, params).await {
                warn!(error = %err, "Socket authentication failed");
                conn.close();
                return Err(err.into());
            }
            debug!("Socket authenticated");
        }

        Ok(conn)
    }
}
