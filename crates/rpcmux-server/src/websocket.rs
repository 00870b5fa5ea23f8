//! WebSocket transport, reached by upgrading an HTTP request

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Empty};
use hyper::header::{
    CONNECTION, HeaderValue, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rpcmux_json_rpc::{ChannelSink, Framer, RpcError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::handler::{HttpBody, error_response};
use crate::server::ServerContext;

/// `Upgrade: websocket` together with `Connection: upgrade`
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let upgrade = req
        .headers()
        .get(UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"));
    let connection = req
        .headers()
        .get(CONNECTION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    upgrade && connection
}

/// Authenticate the upgrade request from its headers and switch protocols.
/// A rejected upgrade gets the same error envelope as a rejected POST.
pub(crate) async fn upgrade<B>(
    mut req: Request<B>,
    ctx: Arc<ServerContext>,
    connection_id: Arc<str>,
) -> Response<HttpBody>
where
    B: Send + 'static,
{
    if !ctx.auth_snapshot().check_headers(req.headers()).await {
        warn!(connection_id = %connection_id, "Unauthorized WebSocket upgrade");
        return error_response(&RpcError::unauthorized(), &ctx.custom_headers);
    }

    let Some(key) = req.headers().get(SEC_WEBSOCKET_KEY) else {
        return error_response(
            &RpcError::InvalidRequest("Missing Sec-WebSocket-Key".into()),
            &ctx.custom_headers,
        );
    };
    let accept = derive_accept_key(key.as_bytes());

    let on_upgrade = hyper::upgrade::on(&mut req);
    let span = info_span!("websocket", connection_id = %connection_id);
    tokio::spawn(
        async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let ws = WebSocketStream::from_raw_socket(
                        TokioIo::new(upgraded),
                        Role::Server,
                        None,
                    )
                    .await;
                    serve_websocket(ws, ctx, &connection_id).await;
                }
                Err(err) => error!(error = %err, "WebSocket upgrade failed"),
            }
        }
        .instrument(span),
    );

    let mut response = Response::new(Empty::<Bytes>::new().boxed_unsync());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    match HeaderValue::from_str(&accept) {
        Ok(value) => {
            headers.insert(SEC_WEBSOCKET_ACCEPT, value);
        }
        Err(err) => error!(error = %err, "Invalid Sec-WebSocket-Accept value"),
    }
    response
}

/// Run one established WebSocket until either side closes it.
///
/// Text and binary frames are both fed to the framer, so a message may span
/// frames and a frame may hold several messages.
pub(crate) async fn serve_websocket<S>(
    ws: WebSocketStream<S>,
    ctx: Arc<ServerContext>,
    connection_id: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("Accepted WebSocket connection");

    let (mut outgoing, mut incoming) = ws.split();
    let (sink, mut rx) = ChannelSink::new();
    let conn = ctx.connection(Arc::new(sink), connection_id);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(err) = outgoing.send(Message::text(frame)).await {
                debug!(error = %err, "WebSocket write failed");
                break;
            }
        }
        let _ = outgoing.close().await;
    });

    let mut framer = Framer::with_max_buffered(ctx.config.max_frame_size);
    while let Some(message) = incoming.next().await {
        match message {
            Ok(Message::Text(text)) => framer.feed(text.as_bytes(), |value| conn.handle_message(value)),
            Ok(Message::Binary(data)) => framer.feed(&data, |value| conn.handle_message(value)),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "WebSocket read failed");
                break;
            }
        }
    }

    debug!("WebSocket connection closed");
    framer.reset();
    conn.close();
    let _ = writer.await;
}
