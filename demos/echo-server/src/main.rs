//! # rpcmux Echo Server
//!
//! ## Usage
//!
//! ```bash
//! # HTTP + WebSocket on port 8000
//! cargo run --package echo-server
//!
//! # HTTP and raw TCP on one port, with Basic auth
//! cargo run --package echo-server -- --mode hybrid --basic user:pass
//!
//! curl -u user:pass -d '{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}' http://127.0.0.1:8000/
//! ```
//!
//! Methods: `echo`, `add`, `ping` and `subscribe`, which streams `tick`
//! notifications on HTTP, WebSocket and raw connections alike.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use rpcmux_json_rpc::{BoxError, CallPolicy, RpcError};
use rpcmux_server::{JwtValidator, ListenMode, RpcServer, TokenFn};
use serde_json::{Value, json};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Http,
    Raw,
    Hybrid,
}

impl From<Mode> for ListenMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Http => ListenMode::Http,
            Mode::Raw => ListenMode::Raw,
            Mode::Hybrid => ListenMode::Hybrid,
        }
    }
}

#[derive(Parser)]
#[command(name = "echo-server", about = "rpcmux JSON-RPC demo server")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Transport served on the port
    #[arg(short, long, value_enum, default_value = "http")]
    mode: Mode,

    /// Require Basic auth, as `user:password`
    #[arg(long)]
    basic: Option<String>,

    /// Require this exact Cookie header value
    #[arg(long)]
    cookie: Option<String>,

    /// Require an HS256 bearer token signed with this secret
    #[arg(long)]
    jwt_secret: Option<String>,

    /// Maximum HTTP request body in bytes
    #[arg(long, default_value_t = 1024 * 1024)]
    max_body_size: usize,

    /// Disable WebSocket upgrades on the HTTP listener
    #[arg(long)]
    no_websocket: bool,

    /// Extra response header, as `Name: value`; repeatable
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Deadline of server-initiated calls in milliseconds; 0 waits forever
    #[arg(long, default_value_t = 30_000)]
    call_timeout_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into()),
        )
        .init();

    let server = build_server(&args)?;
    configure_auth(&server, &args)?;

    info!(
        bind = %args.bind,
        mode = ?args.mode,
        auth = %server.auth_type(),
        "Starting echo server"
    );
    server
        .serve(
            tokio::net::TcpListener::bind(args.bind)
                .await
                .with_context(|| format!("failed to bind {}", args.bind))?,
            args.mode.into(),
        )
        .await?;
    Ok(())
}

fn build_server(args: &Args) -> Result<RpcServer> {
    let policy = match args.call_timeout_ms {
        0 => CallPolicy::unbounded(),
        ms => CallPolicy::with_timeout(Duration::from_millis(ms)),
    };

    let mut builder = RpcServer::builder()
        .bind_address(args.bind)
        .max_body_size(args.max_body_size)
        .websocket(!args.no_websocket)
        .call_policy(policy);

    for header in &args.headers {
        let Some((name, value)) = header.split_once(':') else {
            bail!("header must look like `Name: value`, got {header:?}");
        };
        builder = builder.header(name.trim(), value.trim());
    }

    let server = builder
        .expose("echo", |params, _ctx| async move {
            Ok::<_, BoxError>(params.into_iter().next().unwrap_or(Value::Null))
        })
        .expose("ping", |_params, _ctx| async move { Ok::<_, BoxError>(json!("pong")) })
        .expose("add", |params, _ctx| async move {
            params
                .iter()
                .map(|value| {
                    value
                        .as_f64()
                        .ok_or_else(|| RpcError::InvalidParams(format!("not a number: {value}")))
                })
                .sum::<Result<f64, RpcError>>()
                .map(|sum| json!(sum))
        })
        .expose("subscribe", |params, ctx| async move {
            let count = params.first().and_then(Value::as_u64).unwrap_or(3);
            // Raw and WebSocket connections are already persistent
            if let Err(err) = ctx.connection.stream() {
                tracing::debug!(error = %err, "Connection does not stream");
            }

            let conn = ctx.connection.clone();
            tokio::spawn(async move {
                for tick in 1..=count {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    if conn.notify("tick", json!([tick])).is_err() {
                        return;
                    }
                }
                if conn.is_streaming() {
                    conn.close();
                }
            });
            Ok::<_, BoxError>(json!({"ticks": count}))
        })
        .build()?;
    Ok(server)
}

fn configure_auth(server: &RpcServer, args: &Args) -> Result<()> {
    if let Some(cookie) = args.cookie.clone() {
        server.enable_cookie_auth(Arc::new(TokenFn(move |value: String| {
            let expected = cookie.clone();
            async move { Ok::<_, BoxError>(value == expected) }
        })));
    }

    if let Some(secret) = &args.jwt_secret {
        server.enable_jwt_auth(Arc::new(JwtValidator::hs256(secret.as_bytes())));
    }

    // Enabled last so Basic is the active type when several are given
    if let Some(basic) = &args.basic {
        let Some((user, password)) = basic.split_once(':') else {
            bail!("--basic must look like `user:password`");
        };
        server.enable_basic_auth(user, password);
    }

    let configured = [args.cookie.is_some(), args.jwt_secret.is_some(), args.basic.is_some()];
    if configured.iter().filter(|set| **set).count() > 1 {
        warn!(active = %server.auth_type(), "Several auth types configured; only one is active");
    }
    Ok(())
}
