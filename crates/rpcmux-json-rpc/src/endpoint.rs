use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::BoxError;
use crate::connection::Connection;
use crate::error::RpcError;
use crate::message::IncomingCall;
use crate::types::RequestId;

/// Dispatch collaborator invoked once per inbound request or notification.
///
/// The connection is handed over so a handler can call back to the peer or
/// switch an HTTP response into streaming mode.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn handle_call(
        &self,
        call: IncomingCall,
        connection: Connection,
    ) -> Result<Value, RpcError>;
}

/// What a registered method sees besides its parameters
#[derive(Clone)]
pub struct CallContext {
    pub method: String,
    /// `None` when the peer sent a notification
    pub id: Option<RequestId>,
    pub connection: Connection,
}

type MethodFn =
    Arc<dyn Fn(Vec<Value>, CallContext) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Name-to-handler table implementing [`Endpoint`]
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodFn>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous handler.
    ///
    /// Handler errors that downcast to [`RpcError`] are sent as-is; anything
    /// else reaches the peer as `InternalError`.
    pub fn expose<F, Fut, E>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let handler = Arc::new(handler);
        let method: MethodFn = Arc::new(move |params, ctx| {
            let fut = handler(params, ctx);
            Box::pin(async move { fut.await.map_err(Into::into) })
        });
        self.methods.insert(name.into(), method);
        self
    }

    /// Builder form of [`expose`](Self::expose)
    pub fn with_method<F, Fut, E>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.expose(name, handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Endpoint for MethodRegistry {
    async fn handle_call(
        &self,
        call: IncomingCall,
        connection: Connection,
    ) -> Result<Value, RpcError> {
        let Some(method) = self.methods.get(&call.method).cloned() else {
            debug!(method = %call.method, "Method not found");
            return Err(RpcError::MethodNotFound(call.method));
        };

        let params = call.positional_params();
        let ctx = CallContext {
            method: call.method,
            id: call.id,
            connection,
        };
        method(params, ctx).await.map_err(RpcError::from_handler_error)
    }
}

#[async_trait]
impl<T: Endpoint + ?Sized> Endpoint for Arc<T> {
    async fn handle_call(
        &self,
        call: IncomingCall,
        connection: Connection,
    ) -> Result<Value, RpcError> {
        (**self).handle_call(call, connection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::UnsupportedSink;
    use serde_json::json;

    fn registry() -> MethodRegistry {
        MethodRegistry::new()
            .with_method("echo", |params, _ctx| async move {
                Ok::<_, BoxError>(params.into_iter().next().unwrap_or(Value::Null))
            })
            .with_method("fail", |_params, _ctx| async move {
                Err::<Value, _>(RpcError::InvalidParams("need two".into()))
            })
            .with_method("explode", |_params, _ctx| async move {
                Err::<Value, BoxError>("boom".into())
            })
    }

    fn call(method: &str, params: Value) -> IncomingCall {
        IncomingCall {
            id: Some(RequestId::Number(1)),
            method: method.into(),
            params: Some(params),
        }
    }

    #[tokio::test]
    async fn test_registered_method() {
        let conn = Connection::new(Arc::new(UnsupportedSink));
        let result = registry().handle_call(call("echo", json!(["hello"])), conn).await;
        assert_eq!(result, Ok(json!("hello")));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let conn = Connection::new(Arc::new(UnsupportedSink));
        let result = registry().handle_call(call("nope", json!([])), conn).await;
        assert_eq!(result, Err(RpcError::MethodNotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_handler_errors() {
        let registry = registry();
        let conn = Connection::new(Arc::new(UnsupportedSink));

        let typed = registry.handle_call(call("fail", json!([])), conn.clone()).await;
        assert_eq!(typed, Err(RpcError::InvalidParams("need two".into())));

        let untyped = registry.handle_call(call("explode", json!([])), conn).await;
        assert_eq!(untyped, Err(RpcError::InternalError("boom".into())));
    }

    #[test]
    fn test_method_listing() {
        assert_eq!(registry().methods(), vec!["echo", "explode", "fail"]);
        assert!(registry().contains("echo"));
    }
}
