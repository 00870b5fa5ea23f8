//! HTTP request handling: one JSON-RPC message per POST

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use http_body::{Body, Frame};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use rpcmux_json_rpc::{
    BoxError, ChannelSink, IncomingCall, JsonRpcErrorResponse, Message, RpcError, classify,
};
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, warn};

use crate::cors::CorsLayer;
use crate::server::ServerContext;
use crate::websocket;

/// Response body of every HTTP reply, fixed-length or streaming
pub type HttpBody = UnsyncBoxBody<Bytes, Infallible>;

const INVALID_REQUEST: &str = "Invalid Request";

/// Route one HTTP request.
///
/// Protocol problems are answered with a status 200 error envelope whose id
/// is `null`; they never reach the endpoint.
pub(crate) async fn handle_request<B>(
    req: Request<B>,
    ctx: Arc<ServerContext>,
    connection_id: Arc<str>,
) -> Response<HttpBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    debug!(connection_id = %connection_id, method = %req.method(), path = %req.uri().path(), "HTTP request");

    if req.method() == Method::OPTIONS {
        return preflight_response(&ctx.custom_headers);
    }

    if ctx.config.websocket && websocket::is_upgrade_request(&req) {
        return websocket::upgrade(req, ctx, connection_id).await;
    }

    if req.method() != Method::POST {
        return error_response(
            &RpcError::InvalidRequest(INVALID_REQUEST.into()),
            &ctx.custom_headers,
        );
    }

    if !ctx.auth_snapshot().check_headers(req.headers()).await {
        warn!(connection_id = %connection_id, "Unauthorized HTTP request");
        return error_response(&RpcError::unauthorized(), &ctx.custom_headers);
    }

    let body = match Limited::new(req.into_body(), ctx.config.max_body_size)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(connection_id = %connection_id, limit = ctx.config.max_body_size, "Request body too large");
            return error_response(
                &RpcError::InvalidRequest("Request body too large".into()),
                &ctx.custom_headers,
            );
        }
        Err(err) => {
            debug!(connection_id = %connection_id, error = %err, "Failed to read request body");
            return error_response(
                &RpcError::InvalidRequest(INVALID_REQUEST.into()),
                &ctx.custom_headers,
            );
        }
    };

    let decoded: Value = match serde_json::from_slice(&body) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(connection_id = %connection_id, error = %err, "Unparsable request body");
            return error_response(
                &RpcError::ParseError("Parse error".into()),
                &ctx.custom_headers,
            );
        }
    };

    match validate_call(decoded) {
        Some(call) => dispatch(call, ctx, connection_id).await,
        None => error_response(
            &RpcError::InvalidRequest(INVALID_REQUEST.into()),
            &ctx.custom_headers,
        ),
    }
}

/// A POST body must carry a method name and params; anything else is an
/// invalid request even if it is valid JSON-RPC otherwise.
fn validate_call(decoded: Value) -> Option<IncomingCall> {
    let has_method = decoded
        .get("method")
        .and_then(Value::as_str)
        .is_some_and(|method| !method.is_empty());
    let has_params = decoded.get("params").is_some_and(|params| !params.is_null());
    if !has_method || !has_params {
        return None;
    }

    match classify(decoded) {
        Message::Call(call) => Some(call),
        _ => None,
    }
}

async fn dispatch(
    call: IncomingCall,
    ctx: Arc<ServerContext>,
    connection_id: Arc<str>,
) -> Response<HttpBody> {
    let (sink, rx) = ChannelSink::new();
    let conn = ctx.connection(Arc::new(sink.streamable()), &connection_id);

    debug!(connection_id = %connection_id, method = %call.method, id = ?call.id, "Dispatching HTTP call");
    let reply = conn.dispatch_call(call).await;

    let encoded = match reply.as_ref().map(serde_json::to_string).transpose() {
        Ok(encoded) => encoded,
        Err(err) => {
            error!(connection_id = %connection_id, error = %err, "Failed to serialize reply");
            conn.close();
            return error_response(
                &RpcError::InternalError(err.to_string()),
                &ctx.custom_headers,
            );
        }
    };

    if !conn.is_streaming() {
        conn.close();
        return json_response(encoded.unwrap_or_default(), &ctx.custom_headers);
    }

    // The body stays open until every handle of the connection is closed or
    // dropped; later writes follow the reply.
    debug!(connection_id = %connection_id, "Streaming HTTP response");
    let first = encoded.map(Bytes::from);
    let frames = futures::stream::iter(first)
        .chain(UnboundedReceiverStream::new(rx).map(Bytes::from))
        .map(|chunk| Ok::<_, Infallible>(Frame::data(chunk)));

    let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    CorsLayer::apply_custom_headers(response.headers_mut(), &ctx.custom_headers);
    response
}

fn full_body(bytes: impl Into<Bytes>) -> HttpBody {
    Full::new(bytes.into()).boxed_unsync()
}

/// 200 with a JSON body of exact length; an empty body answers notifications
pub(crate) fn json_response(encoded: String, custom: &HeaderMap) -> Response<HttpBody> {
    let length = encoded.len();
    let mut response = Response::new(full_body(encoded));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    CorsLayer::apply_custom_headers(headers, custom);
    response
}

pub(crate) fn preflight_response(custom: &HeaderMap) -> Response<HttpBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    CorsLayer::apply_preflight_headers(response.headers_mut());
    CorsLayer::apply_custom_headers(response.headers_mut(), custom);
    response
}

/// Error envelope `{"jsonrpc":"2.0","error":{..},"id":null}` with status 200
pub(crate) fn error_response(err: &RpcError, custom: &HeaderMap) -> Response<HttpBody> {
    let encoded = serde_json::to_string(&JsonRpcErrorResponse::new(None, err)).unwrap_or_default();
    let length = encoded.len();

    let mut response = Response::new(full_body(encoded));
    *response.status_mut() = StatusCode::OK;
    CorsLayer::apply_error_headers(response.headers_mut(), length);
    CorsLayer::apply_custom_headers(response.headers_mut(), custom);
    response
}
