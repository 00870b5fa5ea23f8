//! Shared setup for the integration tests: an echo server on an ephemeral
//! port and a client pointed at it.

use std::net::SocketAddr;

use rpcmux_client::Client;
use rpcmux_json_rpc::BoxError;
use rpcmux_server::{ListenMode, RpcServer};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Methods used across the tests:
///
/// - `echo`: returns its first parameter
/// - `subscribe`: streams one `tick` notification after the reply
/// - `ask_client`: calls `whoami` back on the caller and returns the answer
pub fn echo_server() -> RpcServer {
    RpcServer::builder()
        .expose("echo", |params, _ctx| async move {
            Ok::<_, BoxError>(params.into_iter().next().unwrap_or(Value::Null))
        })
        .expose("subscribe", |_params, ctx| async move {
            ctx.connection.stream()?;
            let conn = ctx.connection.clone();
            tokio::spawn(async move {
                let _ = conn.notify("tick", json!([1]));
                conn.close();
            });
            Ok::<_, BoxError>(json!("subscribed"))
        })
        .expose("ask_client", |_params, ctx| async move {
            let answer = ctx.connection.call("whoami", json!([])).await?;
            Ok::<_, BoxError>(answer)
        })
        .build()
        .expect("valid server configuration")
}

/// Serve `server` on 127.0.0.1 with an OS-assigned port.
pub async fn start(server: &RpcServer, mode: ListenMode) -> SocketAddr {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local address");

    let server = server.clone();
    tokio::spawn(async move {
        let _ = server.serve(listener, mode).await;
    });
    addr
}

pub fn client_for(addr: SocketAddr) -> Client {
    Client::new("127.0.0.1", addr.port()).expect("client")
}
