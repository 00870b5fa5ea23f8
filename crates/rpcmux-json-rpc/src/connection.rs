//! One logical duplex JSON-RPC channel.
//!
//! A [`Connection`] correlates outbound calls with their responses through a
//! private pending-call table and routes inbound requests to an
//! [`Endpoint`]. It never touches sockets itself: bytes leave through a
//! [`MessageSink`] supplied by the transport, and the transport's reader
//! feeds decoded values into [`Connection::handle_message`].
//!
//! Cloning a `Connection` is cheap and yields a handle to the same channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::endpoint::Endpoint;
use crate::error::{CallError, ConnectionError, RpcError};
use crate::message::{IncomingCall, Message, ResponseMessage, classify};
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::{JsonRpcErrorResponse, Reply};
use crate::types::RequestId;

/// Default deadline for an outbound call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport write handle of a [`Connection`].
///
/// Every method has a default, so a transport implements only what it can
/// do. A sink that cannot carry server-initiated traffic keeps the default
/// `write`, which fails with [`ConnectionError::UnsupportedOperation`].
pub trait MessageSink: Send + Sync {
    /// Send one serialized message to the peer
    fn write(&self, frame: String) -> Result<(), ConnectionError> {
        let _ = frame;
        Err(ConnectionError::UnsupportedOperation)
    }

    /// Keep the underlying response open for further writes
    fn start_stream(&self) -> Result<(), ConnectionError> {
        Err(ConnectionError::UnsupportedOperation)
    }

    /// Release the transport. Must be idempotent.
    fn close(&self) {}
}

/// Sink for connections that cannot write outside a direct reply
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSink;

impl MessageSink for UnsupportedSink {}

/// Sink forwarding frames to a writer task over an unbounded channel.
///
/// Closing the sink drops the sender, which ends the writer task once it
/// has flushed what was already queued.
///
/// A [`streamable`](Self::streamable) sink backs a single HTTP exchange and
/// refuses writes until the stream is started, since nothing reads the
/// channel before then.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    streamable: bool,
    streaming: AtomicBool,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            tx: Mutex::new(Some(tx)),
            streamable: false,
            streaming: AtomicBool::new(false),
        };
        (sink, rx)
    }

    /// Accept [`MessageSink::start_stream`]
    pub fn streamable(mut self) -> Self {
        self.streamable = true;
        self
    }
}

impl MessageSink for ChannelSink {
    fn write(&self, frame: String) -> Result<(), ConnectionError> {
        if self.streamable && !self.streaming.load(Ordering::SeqCst) {
            return Err(ConnectionError::UnsupportedOperation);
        }
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| ConnectionError::Closed),
            None => Err(ConnectionError::Closed),
        }
    }

    fn start_stream(&self) -> Result<(), ConnectionError> {
        if self.streamable {
            self.streaming.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(ConnectionError::UnsupportedOperation)
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

/// Deadline applied to outbound calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallPolicy {
    /// `None` waits for the response indefinitely
    #[serde(rename = "timeout_ms", with = "option_duration_ms")]
    pub timeout: Option<Duration>,
}

impl CallPolicy {
    pub fn unbounded() -> Self {
        Self { timeout: None }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_CALL_TIMEOUT)
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Counters of inbound traffic that was dropped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub pending_calls: usize,
    pub unknown_responses: u64,
    pub malformed_messages: u64,
}

type Completion = oneshot::Sender<Result<Value, CallError>>;

struct Inner {
    label: String,
    next_id: AtomicI64,
    pending: Mutex<HashMap<RequestId, Completion>>,
    sink: Arc<dyn MessageSink>,
    endpoint: Option<Arc<dyn Endpoint>>,
    policy: CallPolicy,
    closed: AtomicBool,
    streaming: AtomicBool,
    unknown_responses: AtomicU64,
    malformed_messages: AtomicU64,
}

/// Builder for [`Connection`]
pub struct ConnectionBuilder {
    sink: Arc<dyn MessageSink>,
    endpoint: Option<Arc<dyn Endpoint>>,
    policy: CallPolicy,
    label: String,
}

impl ConnectionBuilder {
    /// Route inbound requests to `endpoint`. Without one, every request is
    /// answered with `MethodNotFound`.
    pub fn endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Identifier attached to log events of this connection
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn build(self) -> Connection {
        Connection {
            inner: Arc::new(Inner {
                label: self.label,
                next_id: AtomicI64::new(0),
                pending: Mutex::new(HashMap::new()),
                sink: self.sink,
                endpoint: self.endpoint,
                policy: self.policy,
                closed: AtomicBool::new(false),
                streaming: AtomicBool::new(false),
                unknown_responses: AtomicU64::new(0),
                malformed_messages: AtomicU64::new(0),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.inner.label)
            .field("closed", &self.is_closed())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}

impl Connection {
    /// Connection with no endpoint and the default call policy
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self::builder(sink).build()
    }

    pub fn builder(sink: Arc<dyn MessageSink>) -> ConnectionBuilder {
        ConnectionBuilder {
            sink,
            endpoint: None,
            policy: CallPolicy::default(),
            label: String::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Call `method` on the peer and wait for its response.
    ///
    /// Non-array `params` are sent as a single-element array. The call fails
    /// with the peer's error, with [`ConnectionError::Timeout`] once the
    /// policy deadline passes, or with [`ConnectionError::Closed`] if the
    /// connection goes away first.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        if method.is_empty() {
            return Err(RpcError::InvalidRequest("Method name must not be empty".into()).into());
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let frame = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))
            .map_err(ConnectionError::from)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if self.is_closed() {
                return Err(ConnectionError::Closed.into());
            }
            pending.insert(id.clone(), tx);
        }

        trace!(connection_id = %self.inner.label, %id, method = %method, "Sending call");
        if let Err(err) = self.inner.sink.write(frame) {
            self.inner.pending.lock().remove(&id);
            return Err(err.into());
        }

        let received = match self.inner.policy.timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.pending.lock().remove(&id);
                    warn!(connection_id = %self.inner.label, %id, method = %method, "Call timed out");
                    return Err(ConnectionError::Timeout {
                        method: method.to_string(),
                        id,
                        after,
                    }
                    .into());
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| Err(ConnectionError::Closed.into()))
    }

    /// Send a notification. Nothing is recorded and no reply is expected.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), CallError> {
        if method.is_empty() {
            return Err(RpcError::InvalidRequest("Method name must not be empty".into()).into());
        }
        let frame = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(ConnectionError::from)?;
        self.write(frame)?;
        Ok(())
    }

    /// Single entry point for decoded inbound values.
    pub fn handle_message(&self, value: Value) {
        self.handle_classified(classify(value));
    }

    /// Route an already classified message: responses settle pending calls,
    /// requests run on their own task so a handler can call back to the peer.
    pub fn handle_classified(&self, message: Message) {
        match message {
            Message::Response(response) => self.resolve(response),
            Message::Call(call) => {
                let conn = self.clone();
                tokio::spawn(async move { conn.answer(call).await });
            }
            Message::InvalidRequest(value) => {
                self.inner.malformed_messages.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = %self.inner.label, message = %value, "Request id is not usable");
                let err = RpcError::InvalidRequest("Invalid request id".into());
                let reply = Reply::Error(JsonRpcErrorResponse::new(None, &err));
                if let Err(err) = self.send_reply(&reply) {
                    debug!(connection_id = %self.inner.label, error = %err, "Failed to write reply");
                }
            }
            Message::Malformed(value) => {
                self.inner.malformed_messages.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = %self.inner.label, message = %value, "Dropping malformed message");
            }
        }
    }

    fn resolve(&self, response: ResponseMessage) {
        let completion = self.inner.pending.lock().remove(&response.id);
        match completion {
            Some(tx) => {
                trace!(connection_id = %self.inner.label, id = %response.id, "Resolving call");
                let _ = tx.send(response.outcome.map_err(CallError::Rpc));
            }
            None => {
                self.inner.unknown_responses.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = %self.inner.label, id = %response.id, "Response for unknown call id");
            }
        }
    }

    async fn answer(&self, call: IncomingCall) {
        let Some(reply) = self.dispatch_call(call).await else {
            return;
        };
        if let Err(err) = self.send_reply(&reply) {
            debug!(connection_id = %self.inner.label, error = %err, "Failed to write reply");
        }
    }

    /// Run the endpoint for one inbound call and build the reply, or `None`
    /// for a notification.
    pub async fn dispatch_call(&self, call: IncomingCall) -> Option<Reply> {
        let id = call.id.clone();
        let method = call.method.clone();

        let outcome = match &self.inner.endpoint {
            Some(endpoint) => endpoint.handle_call(call, self.clone()).await,
            None => Err(RpcError::MethodNotFound(method.clone())),
        };

        match id {
            Some(id) => Some(Reply::from_outcome(id, outcome)),
            None => {
                if let Err(err) = outcome {
                    debug!(connection_id = %self.inner.label, method = %method, error = %err, "Notification handler failed");
                }
                None
            }
        }
    }

    pub fn send_reply(&self, reply: &Reply) -> Result<(), ConnectionError> {
        let frame = serde_json::to_string(reply)?;
        self.write(frame)
    }

    /// Write one serialized message through the transport.
    pub fn write(&self, frame: String) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.inner.sink.write(frame)
    }

    /// Keep an HTTP response open after the reply so later writes on this
    /// connection are appended to the response body.
    pub fn stream(&self) -> Result<(), ConnectionError> {
        self.inner.sink.start_stream()?;
        self.inner.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.streaming.load(Ordering::SeqCst)
    }

    /// Tear the connection down: every pending call fails with
    /// [`ConnectionError::Closed`] and the sink is released. Idempotent.
    pub fn close(&self) {
        let drained: Vec<Completion> = {
            let mut pending = self.inner.pending.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            pending.drain().map(|(_, tx)| tx).collect()
        };

        if !drained.is_empty() {
            debug!(connection_id = %self.inner.label, rejected = drained.len(), "Rejecting pending calls on close");
        }
        for tx in drained {
            let _ = tx.send(Err(ConnectionError::Closed.into()));
        }
        self.inner.sink.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            pending_calls: self.pending_calls(),
            unknown_responses: self.inner.unknown_responses.load(Ordering::Relaxed),
            malformed_messages: self.inner.malformed_messages.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxError;
    use crate::endpoint::MethodRegistry;
    use serde_json::json;

    fn channel_connection() -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (sink, rx) = ChannelSink::new();
        (Connection::new(Arc::new(sink)), rx)
    }

    async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let frame = rx.recv().await.expect("frame");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_call_resolves_by_id() {
        let (conn, mut rx) = channel_connection();

        let caller = conn.clone();
        let call = tokio::spawn(async move { caller.call("echo", json!("hi")).await });

        let request = next_frame(&mut rx).await;
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["method"], "echo");
        assert_eq!(request["params"], json!(["hi"]));
        assert_eq!(request["id"], 1);

        conn.handle_message(json!({"jsonrpc": "2.0", "id": 1, "result": "hi"}));
        assert_eq!(call.await.unwrap().unwrap(), json!("hi"));
        assert_eq!(conn.pending_calls(), 0);

        // A duplicate response settles nothing
        conn.handle_message(json!({"jsonrpc": "2.0", "id": 1, "result": "again"}));
        assert_eq!(conn.stats().unknown_responses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_match_out_of_order() {
        let (conn, mut rx) = channel_connection();

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.call("a", json!([])).await }
        });
        let first_id = next_frame(&mut rx).await["id"].clone();

        let second = tokio::spawn({
            let conn = conn.clone();
            async move { conn.call("b", json!([])).await }
        });
        let second_id = next_frame(&mut rx).await["id"].clone();
        assert_ne!(first_id, second_id);

        conn.handle_message(json!({"id": second_id, "result": "second"}));
        conn.handle_message(json!({"id": first_id, "result": "first"}));

        assert_eq!(first.await.unwrap().unwrap(), json!("first"));
        assert_eq!(second.await.unwrap().unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn test_error_response_rejects_call() {
        let (conn, mut rx) = channel_connection();
        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.call("secret", json!([])).await }
        });
        let id = next_frame(&mut rx).await["id"].clone();

        conn.handle_message(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32602, "message": "Unauthorized"}
        }));

        let err = call.await.unwrap().unwrap_err();
        assert!(err.as_rpc().is_some_and(RpcError::is_unauthorized));
    }

    #[tokio::test]
    async fn test_empty_method_rejected_locally() {
        let (conn, mut rx) = channel_connection();
        let err = tokio_test::assert_err!(conn.call("", json!([])).await);
        assert!(matches!(err, CallError::Rpc(RpcError::InvalidRequest(_))));
        tokio_test::assert_err!(rx.try_recv());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_evicts_pending() {
        let (sink, _rx) = ChannelSink::new();
        let conn = Connection::builder(Arc::new(sink))
            .policy(CallPolicy::with_timeout(Duration::from_millis(50)))
            .build();

        let err = conn.call("slow", json!([])).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Connection(ConnectionError::Timeout { .. })
        ));
        assert_eq!(conn.pending_calls(), 0);

        // A late response is treated as unknown
        conn.handle_message(json!({"id": 1, "result": null}));
        assert_eq!(conn.stats().unknown_responses, 1);
    }

    #[tokio::test]
    async fn test_close_rejects_pending_calls() {
        let (conn, mut rx) = channel_connection();
        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.call("never", json!([])).await }
        });
        next_frame(&mut rx).await;

        conn.close();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::Connection(ConnectionError::Closed)));

        let err = conn.call("after", json!([])).await.unwrap_err();
        assert!(matches!(err, CallError::Connection(ConnectionError::Closed)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_sink_write() {
        let conn = Connection::new(Arc::new(UnsupportedSink));
        assert!(matches!(
            conn.write("{}".into()),
            Err(ConnectionError::UnsupportedOperation)
        ));
        assert!(matches!(
            conn.stream(),
            Err(ConnectionError::UnsupportedOperation)
        ));
        let err = conn.call("x", json!([])).await.unwrap_err();
        assert!(matches!(
            err,
            CallError::Connection(ConnectionError::UnsupportedOperation)
        ));
        assert_eq!(conn.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_requests_are_answered_and_notifications_are_not() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
        let registry = MethodRegistry::new().with_method("echo", move |params, ctx| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(ctx.method.clone());
                Ok::<_, BoxError>(params.into_iter().next().unwrap_or(Value::Null))
            }
        });

        let (sink, mut rx) = ChannelSink::new();
        let conn = Connection::builder(Arc::new(sink))
            .endpoint(Arc::new(registry))
            .build();

        conn.handle_message(json!({"jsonrpc": "2.0", "method": "echo", "params": ["quiet"]}));
        assert_eq!(seen_rx.recv().await.as_deref(), Some("echo"));

        conn.handle_message(json!({"jsonrpc": "2.0", "method": "echo", "params": ["loud"], "id": 7}));
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply, json!({"jsonrpc": "2.0", "id": 7, "result": "loud"}));

        // Only the request produced a frame
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_request_without_endpoint_gets_method_not_found() {
        let (conn, mut rx) = channel_connection();
        conn.handle_message(json!({"method": "anything", "id": "abc"}));
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply["id"], "abc");
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_malformed_is_counted() {
        let (conn, _rx) = channel_connection();
        conn.handle_message(json!({"hello": "world"}));
        conn.handle_message(json!(42));
        assert_eq!(conn.stats().malformed_messages, 2);
    }

    #[tokio::test]
    async fn test_streamable_sink_refuses_writes_until_streaming() {
        let (sink, mut rx) = ChannelSink::new();
        let conn = Connection::new(Arc::new(sink.streamable()));

        let err = tokio_test::assert_err!(conn.call("whoami", json!([])).await);
        assert!(matches!(
            err,
            CallError::Connection(ConnectionError::UnsupportedOperation)
        ));
        assert_eq!(conn.pending_calls(), 0);

        conn.stream().unwrap();
        conn.notify("tick", json!([1])).unwrap();
        assert_eq!(next_frame(&mut rx).await["method"], "tick");
    }

    #[tokio::test]
    async fn test_unusable_request_id_gets_null_id_error() {
        let (conn, mut rx) = channel_connection();
        conn.handle_message(json!({"jsonrpc": "2.0", "method": "echo", "params": [], "id": 1.5}));
        let reply = next_frame(&mut rx).await;
        assert_eq!(reply["id"], Value::Null);
        assert_eq!(reply["error"]["code"], -32600);
        assert_eq!(conn.stats().malformed_messages, 1);
    }

    #[tokio::test]
    async fn test_notify_has_no_id() {
        let (conn, mut rx) = channel_connection();
        conn.notify("tick", json!({"n": 1})).unwrap();
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame, json!({"jsonrpc": "2.0", "method": "tick", "params": [{"n": 1}]}));
        assert_eq!(conn.pending_calls(), 0);
    }

    #[test]
    fn test_call_policy_serializes_millis() {
        let policy = CallPolicy::default();
        assert_eq!(serde_json::to_value(policy).unwrap(), json!({"timeout_ms": 30000}));

        let unbounded: CallPolicy = serde_json::from_value(json!({"timeout_ms": null})).unwrap();
        assert_eq!(unbounded, CallPolicy::unbounded());
    }
}
