//! JSON-RPC server with HTTP, WebSocket, raw TCP and hybrid listeners

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use http::HeaderMap;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use rpcmux_json_rpc::{
    AuthType, BoxError, CallContext, CallPolicy, Connection, Endpoint, MessageSink,
    MethodRegistry,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{Instrument, debug, error, info, info_span};
use uuid::Uuid;

use crate::auth::{AuthConfig, BasicAuthenticator, StaticCredentials, TokenAuthenticator};
use crate::config::ServerConfig;
use crate::handler::handle_request;
use crate::hybrid::{Protocol, sniff};
use crate::raw::serve_raw;
use crate::{Result, ServerError};

/// Which transport a listener speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    /// HTTP, plus WebSocket upgrades when enabled
    Http,
    /// Raw JSON-RPC over TCP
    Raw,
    /// HTTP and raw TCP on one port
    Hybrid,
}

/// State shared by every connection of one server
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) custom_headers: HeaderMap,
    pub(crate) auth: RwLock<AuthConfig>,
    pub(crate) endpoint: Arc<dyn Endpoint>,
}

impl ServerContext {
    /// The auth configuration as of now; later changes do not affect it.
    pub(crate) fn auth_snapshot(&self) -> AuthConfig {
        self.auth.read().clone()
    }

    pub(crate) fn connection(&self, sink: Arc<dyn MessageSink>, connection_id: &str) -> Connection {
        Connection::builder(sink)
            .endpoint(Arc::clone(&self.endpoint))
            .policy(self.config.call_policy)
            .label(connection_id)
            .build()
    }
}

/// Builder for [`RpcServer`]
pub struct RpcServerBuilder {
    config: ServerConfig,
    registry: MethodRegistry,
    endpoint: Option<Arc<dyn Endpoint>>,
    auth: AuthConfig,
}

impl RpcServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: MethodRegistry::new(),
            endpoint: None,
            auth: AuthConfig::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Add a header to every HTTP response
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(name.into(), value.into());
        self
    }

    /// Enable or disable WebSocket upgrades
    pub fn websocket(mut self, enable: bool) -> Self {
        self.config.websocket = enable;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn call_policy(mut self, policy: CallPolicy) -> Self {
        self.config.call_policy = policy;
        self
    }

    /// Expose a method on the built-in registry
    pub fn expose<F, Fut, E>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.registry.expose(name, handler);
        self
    }

    /// Use a custom endpoint instead of the built-in registry
    pub fn endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth
            .enable_basic(Arc::new(StaticCredentials::new(username, password)));
        self
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Build the server. Fails if a custom header is not a valid HTTP header.
    pub fn build(self) -> Result<RpcServer> {
        let custom_headers = self.config.header_map()?;
        if self.config.max_body_size == 0 {
            return Err(ServerError::Config("max_body_size must be positive".into()));
        }

        let endpoint = self
            .endpoint
            .unwrap_or_else(|| Arc::new(self.registry) as Arc<dyn Endpoint>);

        Ok(RpcServer {
            ctx: Arc::new(ServerContext {
                config: self.config,
                custom_headers,
                auth: RwLock::new(self.auth),
                endpoint,
            }),
        })
    }
}

impl Default for RpcServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON-RPC server. Cloning yields a handle to the same server, so auth
/// changes made through one handle apply to connections accepted by all.
#[derive(Clone)]
pub struct RpcServer {
    ctx: Arc<ServerContext>,
}

impl RpcServer {
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    pub(crate) fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.ctx)
    }

    /// Require a single fixed username and password
    pub fn enable_basic_auth(&self, username: impl Into<String>, password: impl Into<String>) {
        self.enable_basic_auth_with(Arc::new(StaticCredentials::new(username, password)));
    }

    pub fn enable_basic_auth_with(&self, authenticator: Arc<dyn BasicAuthenticator>) {
        self.ctx.auth.write().enable_basic(authenticator);
        info!("Basic authentication enabled");
    }

    pub fn enable_cookie_auth(&self, authenticator: Arc<dyn TokenAuthenticator>) {
        self.ctx.auth.write().enable_cookie(authenticator);
        info!("Cookie authentication enabled");
    }

    pub fn enable_jwt_auth(&self, authenticator: Arc<dyn TokenAuthenticator>) {
        self.ctx.auth.write().enable_jwt(authenticator);
        info!("JWT authentication enabled");
    }

    /// Switch to a previously enabled type, or to [`AuthType::None`]
    pub fn set_auth_type(&self, auth_type: AuthType) {
        self.ctx.auth.write().set_auth_type(auth_type);
        info!(auth_type = %auth_type, "Authentication type changed");
    }

    pub fn auth_type(&self) -> AuthType {
        self.ctx.auth.read().auth_type()
    }

    /// Bind the configured address and serve HTTP (and WebSocket upgrades)
    pub async fn listen(&self) -> Result<()> {
        self.listen_mode(ListenMode::Http).await
    }

    /// Bind the configured address and serve raw TCP
    pub async fn listen_raw(&self) -> Result<()> {
        self.listen_mode(ListenMode::Raw).await
    }

    /// Bind the configured address and serve HTTP and raw TCP on one port
    pub async fn listen_hybrid(&self) -> Result<()> {
        self.listen_mode(ListenMode::Hybrid).await
    }

    async fn listen_mode(&self, mode: ListenMode) -> Result<()> {
        let listener = TcpListener::bind(self.ctx.config.bind_address).await?;
        self.serve(listener, mode).await
    }

    /// Accept connections from an already bound listener until accepting
    /// fails. Each connection runs on its own task.
    pub async fn serve(&self, listener: TcpListener, mode: ListenMode) -> Result<()> {
        let local_addr = listener.local_addr()?;
        match mode {
            ListenMode::Http => info!("Server listening on http://{}/", local_addr),
            ListenMode::Raw => info!("Server listening on tcp://{}/", local_addr),
            ListenMode::Hybrid => info!("Server (hybrid) listening on http+tcp://{}/", local_addr),
        }

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let connection_id = Uuid::now_v7().to_string();
            let span = info_span!("connection", connection_id = %connection_id, peer = %peer_addr);
            debug!(parent: &span, "New connection");

            let server = self.clone();
            tokio::spawn(
                async move { server.serve_connection(stream, mode, connection_id).await }
                    .instrument(span),
            );
        }
    }

    /// Serve one accepted stream in the given mode.
    pub async fn serve_connection<S>(&self, stream: S, mode: ListenMode, connection_id: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match mode {
            ListenMode::Http => self.serve_http(stream, connection_id).await,
            ListenMode::Raw => serve_raw(stream, self.context(), &connection_id).await,
            ListenMode::Hybrid => match sniff(stream).await {
                Ok(Some((Protocol::Http, stream))) => self.serve_http(stream, connection_id).await,
                Ok(Some((Protocol::Raw, stream))) => {
                    serve_raw(stream, self.context(), &connection_id).await
                }
                Ok(None) => debug!("Connection closed before sending data"),
                Err(err) => debug!(error = %err, "Failed to read first chunk"),
            },
        }
    }

    async fn serve_http<S>(&self, stream: S, connection_id: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = self.context();
        let connection_id: Arc<str> = Arc::from(connection_id);
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            let connection_id = Arc::clone(&connection_id);
            async move { Ok::<_, Infallible>(handle_request(req, ctx, connection_id).await) }
        });

        if let Err(err) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await
        {
            // Filter out common client disconnection errors that aren't actual problems
            if err.is_incomplete_message() || err.is_canceled() {
                debug!("Client disconnected: {}", err);
            } else {
                error!("Error serving connection: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_builder() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 3000);
        let server = RpcServer::builder()
            .bind_address(addr)
            .max_body_size(2048)
            .websocket(false)
            .header("Access-Control-Allow-Origin", "*")
            .build()
            .unwrap();

        assert_eq!(server.config().bind_address, addr);
        assert_eq!(server.config().max_body_size, 2048);
        assert!(!server.config().websocket);
        assert_eq!(
            server.context().custom_headers.get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[test]
    fn test_invalid_custom_header_fails_build() {
        let result = RpcServer::builder().header("bad header", "x").build();
        assert!(matches!(result, Err(ServerError::InvalidHeader { .. })));
    }

    #[test]
    fn test_auth_switching() {
        let server = RpcServer::builder().build().unwrap();
        assert_eq!(server.auth_type(), AuthType::None);

        server.enable_basic_auth("user", "pass");
        assert_eq!(server.auth_type(), AuthType::Basic);
        assert!(server.context().auth_snapshot().requires_auth());

        server.set_auth_type(AuthType::None);
        assert!(!server.context().auth_snapshot().requires_auth());

        server.set_auth_type(AuthType::Basic);
        assert!(server.context().auth_snapshot().requires_auth());
    }
}
