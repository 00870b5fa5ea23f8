//! Persistent transports: WebSocket and raw TCP.
//!
//! Both attach a byte stream to a [`Connection`] with one reader task and one
//! writer task. The connection closes when the peer hangs up, and closing the
//! connection shuts the stream down.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rpcmux_json_rpc::{ChannelSink, Connection, ConnectionBuilder, Framer, JsonCodec, MessageSink};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{Instrument, debug, debug_span};

/// Which persistent transport a connection runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    WebSocket,
    Socket,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::WebSocket => write!(f, "websocket"),
            TransportType::Socket => write!(f, "socket"),
        }
    }
}

/// Drive a raw JSON-RPC byte stream. `builder` supplies the endpoint and call
/// policy; the sink is filled in here.
pub(crate) fn attach_socket<S>(
    stream: S,
    builder: impl FnOnce(Arc<dyn MessageSink>) -> ConnectionBuilder,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (sink, mut rx) = ChannelSink::new();
    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    let conn = builder(sink).build();
    let span = debug_span!("socket", connection = %conn.label());

    let mut writer = FramedWrite::new(write_half, JsonCodec::new());
    tokio::spawn(
        async move {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = writer.send(frame).await {
                    debug!(error = %err, "Socket write failed");
                    break;
                }
            }
            let _ = writer.close().await;
        }
        .instrument(span.clone()),
    );

    let reader_conn = conn.clone();
    let mut reader = FramedRead::new(read_half, JsonCodec::new());
    tokio::spawn(
        async move {
            while let Some(decoded) = reader.next().await {
                match decoded {
                    Ok(value) => reader_conn.handle_message(value),
                    Err(err) => {
                        debug!(error = %err, "Socket read failed");
                        break;
                    }
                }
            }
            debug!("Socket closed by peer");
            reader_conn.close();
        }
        .instrument(span),
    );

    conn
}

/// Drive an established WebSocket. Text and binary frames both feed the
/// framer; outgoing messages are sent as text frames.
pub(crate) fn attach_websocket<S>(
    ws: WebSocketStream<S>,
    builder: impl FnOnce(Arc<dyn MessageSink>) -> ConnectionBuilder,
) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut outgoing, mut incoming) = ws.split();
    let (sink, mut rx) = ChannelSink::new();
    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    let conn = builder(sink).build();
    let span = debug_span!("websocket", connection = %conn.label());

    tokio::spawn(
        async move {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = outgoing.send(Message::text(frame)).await {
                    debug!(error = %err, "WebSocket write failed");
                    break;
                }
            }
            let _ = outgoing.close().await;
        }
        .instrument(span.clone()),
    );

    let reader_conn = conn.clone();
    tokio::spawn(
        async move {
            let mut framer = Framer::new();
            while let Some(message) = incoming.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        framer.feed(text.as_bytes(), |value| reader_conn.handle_message(value))
                    }
                    Ok(Message::Binary(data)) => {
                        framer.feed(&data, |value| reader_conn.handle_message(value))
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!(error = %err, "WebSocket read failed");
                        break;
                    }
                }
            }
            debug!("WebSocket closed by peer");
            framer.reset();
            reader_conn.close();
        }
        .instrument(span),
    );

    conn
}
