//! Streaming HTTP responses
//!
//! A streaming call posts one request and keeps reading the response body.
//! The server may append further messages after the reply, such as
//! notifications or calls of its own, until it closes the body.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use futures::stream::BoxStream;
use rpcmux_json_rpc::{ErrorObject, Framer, Message, RequestId, RpcError, classify};
use serde_json::Value;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

/// One message read from a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Successful reply to the posted request
    Result(Value),
    /// Error reply to the posted request
    Error(RpcError),
    /// A call or notification sent by the server
    Call { method: String, params: Vec<Value> },
    /// Any other message, including replies with a foreign id
    Data(Value),
}

impl StreamEvent {
    fn from_value(value: Value, request_id: &RequestId) -> Self {
        // Rejections by the server's gate carry a null id
        if value.get("id").is_some_and(Value::is_null) {
            if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
                return StreamEvent::Error(RpcError::from_object(ErrorObject::from_value(error)));
            }
        }

        match classify(value.clone()) {
            Message::Response(response) if &response.id == request_id => match response.outcome {
                Ok(result) => StreamEvent::Result(result),
                Err(err) => StreamEvent::Error(err),
            },
            Message::Call(call) => {
                let params = call.positional_params();
                StreamEvent::Call {
                    method: call.method,
                    params,
                }
            }
            _ => StreamEvent::Data(value),
        }
    }
}

/// Events decoded incrementally from an open HTTP response body
pub struct HttpStream {
    request_id: RequestId,
    body: BoxStream<'static, ClientResult<Bytes>>,
    framer: Framer,
    ready: VecDeque<Value>,
    finished: bool,
}

impl HttpStream {
    pub(crate) fn new<S>(request_id: RequestId, body: S) -> Self
    where
        S: Stream<Item = ClientResult<Bytes>> + Send + 'static,
    {
        Self {
            request_id,
            body: Box::pin(body),
            framer: Framer::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Skip events until the reply to the posted request arrives.
    pub async fn result(&mut self) -> ClientResult<Value> {
        use futures::StreamExt;

        while let Some(event) = self.next().await {
            match event? {
                StreamEvent::Result(result) => return Ok(result),
                StreamEvent::Error(err) => return Err(ClientError::Rpc(err)),
                _ => {}
            }
        }
        Err(ClientError::MissingReply)
    }
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream")
            .field("request_id", &self.request_id)
            .field("buffered", &self.framer.buffered())
            .field("ready", &self.ready.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Stream for HttpStream {
    type Item = ClientResult<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if let Some(value) = this.ready.pop_front() {
                return Poll::Ready(Some(Ok(StreamEvent::from_value(value, &this.request_id))));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    let ready = &mut this.ready;
                    this.framer.feed(&chunk, |value| ready.push_back(value));
                }
                Poll::Ready(Some(Err(err))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    if this.framer.buffered() > 0 {
                        debug!(bytes = this.framer.buffered(), "Stream ended inside a message");
                    }
                    this.framer.reset();
                    this.finished = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn stream_of(chunks: &[&'static str]) -> HttpStream {
        let chunks: Vec<ClientResult<Bytes>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect();
        HttpStream::new(RequestId::Number(1), futures::stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_events_across_chunks() {
        let mut stream = stream_of(&[
            r#"{"jsonrpc":"2.0","id":1,"res"#,
            r#"ult":"ok"}{"jsonrpc":"2.0","method":"tick","params":[1]}"#,
            r#"{"jsonrpc":"2.0","id":7,"result":"other"}"#,
        ]);

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Result(json!("ok"))
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Call {
                method: "tick".into(),
                params: vec![json!(1)]
            }
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Data(json!({"jsonrpc": "2.0", "id": 7, "result": "other"}))
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_reply() {
        let mut stream = stream_of(&[
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Unauthorized"}}"#,
        ]);
        let err = tokio_test::assert_err!(stream.result().await);
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_null_id_error_is_reply() {
        let mut stream = stream_of(&[
            r#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid Request"},"id":null}"#,
        ]);
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::Error(RpcError::InvalidRequest("Invalid Request".into()))
        );
    }

    #[tokio::test]
    async fn test_missing_reply() {
        let mut stream = stream_of(&[r#"{"jsonrpc":"2.0","method":"tick"}"#]);
        assert!(matches!(
            stream.result().await,
            Err(ClientError::MissingReply)
        ));
    }
}
