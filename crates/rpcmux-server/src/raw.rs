//! Raw TCP transport: JSON values written back to back on a byte stream.
//!
//! Raw sockets carry no headers, so when authentication is active the first
//! message must be an `auth` call:
//!
//! ```text
//! {"jsonrpc":"2.0","method":"auth","params":["user","pass"],"id":0}
//! ```
//!
//! Every message before a successful `auth` is refused, with an
//! `Unauthorized` error reply when it carries an id. Notifications, `auth`
//! included, are never answered. The socket stays open so the peer can retry.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rpcmux_json_rpc::{
    AUTH_METHOD, ChannelSink, Connection, JsonCodec, JsonRpcErrorResponse, Message, Reply,
    RequestId, RpcError, classify,
};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::server::ServerContext;

/// Serve one raw connection until the peer disconnects.
pub(crate) async fn serve_raw<S>(stream: S, ctx: Arc<ServerContext>, connection_id: &str)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    debug!("Accepted raw socket connection");

    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(
        read_half,
        JsonCodec::with_max_buffered(ctx.config.max_frame_size),
    );
    let mut writer = FramedWrite::new(write_half, JsonCodec::new());

    let (sink, mut rx) = ChannelSink::new();
    let conn = ctx.connection(Arc::new(sink), connection_id);

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = writer.send(frame).await {
                debug!(error = %err, "Raw socket write failed");
                break;
            }
        }
        let _ = writer.close().await;
    });

    let mut require_auth = ctx.auth_snapshot().requires_auth();
    while let Some(decoded) = reader.next().await {
        let value = match decoded {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "Raw socket read failed");
                break;
            }
        };

        if require_auth {
            require_auth = !handshake(&conn, value, &ctx).await;
            if !require_auth {
                info!("Raw socket authenticated");
            }
            continue;
        }

        conn.handle_message(value);
    }

    debug!(dropped_frames = reader.decoder().dropped_frames(), "Raw socket closed");
    conn.close();
    let _ = write_task.await;
}

/// Process one message of an unauthenticated socket. Returns whether the
/// socket is authenticated afterwards.
async fn handshake(conn: &Connection, value: Value, ctx: &ServerContext) -> bool {
    let id = value.get("id").and_then(RequestId::from_value);

    let params = match classify(value) {
        Message::Call(call) if call.method == AUTH_METHOD => call.positional_params(),
        Message::InvalidRequest(_) => {
            warn!("Message with an unusable id before authentication");
            let refusal = JsonRpcErrorResponse::new(None, &RpcError::unauthorized());
            send(conn, &Reply::Error(refusal));
            return false;
        }
        _ => {
            warn!("Message before authentication");
            reply(conn, id, Err(RpcError::unauthorized()));
            return false;
        }
    };

    if ctx.auth_snapshot().check_handshake(&params).await {
        reply(conn, id, Ok(Value::Bool(true)));
        true
    } else {
        warn!("Raw socket authentication failed");
        reply(conn, id, Err(RpcError::unauthorized()));
        false
    }
}

fn reply(conn: &Connection, id: Option<RequestId>, outcome: Result<Value, RpcError>) {
    let Some(id) = id else {
        return;
    };
    send(conn, &Reply::from_outcome(id, outcome));
}

fn send(conn: &Connection, reply: &Reply) {
    if let Err(err) = conn.send_reply(reply) {
        debug!(error = %err, "Failed to send handshake reply");
    }
}
