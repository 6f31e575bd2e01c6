//! The management protocol: a length-prefixed JSON envelope, served over a
//! TCP port and/or a Unix domain socket. Verbs: `ping`, `shutdown`, `status`,
//! `status details`, `conf {reload,ls,get,set}`, `clear prometheus`.
//!
//! A Unix-socket peer is trusted implicitly (only a local operator can reach
//! it); a TCP peer must present one of the configured admin credentials.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::state::AppState;

const MAX_FRAME_LEN: u32 = 1 << 20;

// Stable numeric error codes, grouped by the verb that raises them.
const ERR_MALFORMED: i32 = 100;
const ERR_UNKNOWN_COMMAND: i32 = 101;
const ERR_UNKNOWN_SUBCOMMAND: i32 = 102;
const ERR_AUTH_REQUIRED: i32 = 200;
const ERR_AUTH_INVALID: i32 = 201;
const ERR_CONF_RELOAD: i32 = 1100;
const ERR_CONF_GET: i32 = 1200;
const ERR_CONF_SET: i32 = 1300;

#[derive(Deserialize)]
struct MgmtRequest {
    command: String,
    #[serde(default)]
    subcommand: Option<String>,
    #[serde(default)]
    args: serde_json::Value,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<i64>,
}

#[derive(Serialize)]
struct OkOutcome {
    status: &'static str,
    elapsed_ms: u128,
}

#[derive(Serialize)]
struct OkEnvelope {
    outcome: OkOutcome,
    response: serde_json::Value,
}

#[derive(Serialize)]
struct ErrOutcome {
    status: &'static str,
    code: i32,
    message: String,
}

#[derive(Serialize)]
struct ErrEnvelope {
    outcome: ErrOutcome,
}

fn ok_envelope(elapsed: std::time::Duration, response: serde_json::Value) -> serde_json::Value {
    serde_json::to_value(OkEnvelope { outcome: OkOutcome { status: "ok", elapsed_ms: elapsed.as_millis() }, response }).unwrap_or(serde_json::Value::Null)
}

fn err_envelope(code: i32, message: impl Into<String>) -> serde_json::Value {
    serde_json::to_value(ErrEnvelope { outcome: ErrOutcome { status: "error", code, message: message.into() } }).unwrap_or(serde_json::Value::Null)
}

pub async fn run(state: Arc<AppState>, shutdown: Arc<Notify>) {
    let snapshot = state.snapshot.load();
    let tcp_addr = format!("{}:{}", snapshot.config.host, snapshot.config.management_port);
    let unix_path = snapshot.config.management_unix_socket.clone();
    drop(snapshot);

    let mut handles = Vec::new();

    match TcpListener::bind(&tcp_addr).await {
        Ok(listener) => {
            info!(addr = %tcp_addr, "management: listening on TCP");
            let state = state.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { accept_tcp_loop(listener, state, shutdown).await }));
        }
        Err(e) => warn!(addr = %tcp_addr, error = %e, "management: failed to bind TCP listener"),
    }

    if let Some(path) = unix_path {
        match bind_unix(&path) {
            Ok(listener) => {
                info!(path = %path.display(), "management: listening on Unix socket");
                let state = state.clone();
                let shutdown = shutdown.clone();
                handles.push(tokio::spawn(async move { accept_unix_loop(listener, state, shutdown).await }));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "management: failed to bind Unix socket"),
        }
    }

    for handle in handles {
        let _ = handle.await;
    }
}

fn bind_unix(path: &PathBuf) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

async fn accept_tcp_loop(listener: TcpListener, state: Arc<AppState>, shutdown: Arc<Notify>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = state.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, &state, &shutdown, true).await {
                        warn!(%addr, error = %e, "management: connection error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "management: TCP accept failed");
                break;
            }
        }
    }
}

async fn accept_unix_loop(listener: UnixListener, state: Arc<AppState>, shutdown: Arc<Notify>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let state = state.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, &state, &shutdown, false).await {
                        warn!(error = %e, "management: connection error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "management: Unix accept failed");
                break;
            }
        }
    }
}

trait Frame: AsyncReadExt + AsyncWriteExt + Unpin {}
impl Frame for TcpStream {}
impl Frame for UnixStream {}

/// Reads exactly one request, dispatches it, writes exactly one response.
/// The management protocol is request/response per connection, not a
/// persistent session — matching the spec's "bounded request and response
/// envelope" per verb.
async fn serve_connection<S: Frame>(mut stream: S, state: &Arc<AppState>, shutdown: &Arc<Notify>, requires_auth: bool) -> std::io::Result<()> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return write_frame(&mut stream, &err_envelope(ERR_MALFORMED, "request frame too large")).await;
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;

    let response = match serde_json::from_slice::<MgmtRequest>(&body) {
        Ok(req) => dispatch(req, state, shutdown, requires_auth).await,
        Err(e) => err_envelope(ERR_MALFORMED, format!("malformed request: {e}")),
    };

    write_frame(&mut stream, &response).await
}

async fn write_frame<S: Frame>(stream: &mut S, value: &serde_json::Value) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    stream.write_all(&bytes).await
}

fn authenticate(req: &MgmtRequest, state: &Arc<AppState>) -> Result<(), serde_json::Value> {
    let snapshot = state.snapshot.load();
    if snapshot.config.admins.is_empty() {
        return Ok(());
    }
    let (Some(user), Some(pass)) = (req.username.as_deref(), req.password.as_deref()) else {
        return Err(err_envelope(ERR_AUTH_REQUIRED, "username and password required"));
    };
    let matched = snapshot.config.admins.iter().any(|a| a.username == user && a.password.as_str() == pass);
    if matched { Ok(()) } else { Err(err_envelope(ERR_AUTH_INVALID, "invalid admin credentials")) }
}

async fn dispatch(req: MgmtRequest, state: &Arc<AppState>, shutdown: &Arc<Notify>, requires_auth: bool) -> serde_json::Value {
    let t0 = Instant::now();

    if requires_auth && req.command != "ping" {
        if let Err(e) = authenticate(&req, state) {
            return e;
        }
    }

    let result = match req.command.as_str() {
        "ping" => Ok(serde_json::json!({"pong": true})),
        "shutdown" => {
            shutdown.notify_one();
            Ok(serde_json::json!({"shutting_down": true}))
        }
        "status" => Ok(status_response(state, req.subcommand.as_deref() == Some("details"))),
        "conf" => conf_dispatch(req.subcommand.as_deref(), &req.args, state).await,
        "clear" if req.subcommand.as_deref() == Some("prometheus") => {
            state.snapshot.load().metrics_cache.clear();
            Ok(serde_json::json!({"cleared": "prometheus"}))
        }
        "clear" => Err(err_envelope(ERR_UNKNOWN_SUBCOMMAND, "clear: unknown subcommand (expected \"prometheus\")")),
        other => Err(err_envelope(ERR_UNKNOWN_COMMAND, format!("unknown command {other:?}"))),
    };

    match result {
        Ok(response) => ok_envelope(t0.elapsed(), response),
        Err(envelope) => envelope,
    }
}

fn status_response(state: &Arc<AppState>, details: bool) -> serde_json::Value {
    let snapshot = state.snapshot.load();
    let servers: Vec<_> = snapshot
        .servers
        .iter()
        .map(|s| {
            serde_json::json!({
                "name": s.config.name,
                "healthy": s.state.is_healthy(),
                "role": s.state.role().map(|r| format!("{r:?}")),
                "version_num": s.state.version_num(),
                "last_seen": s.state.last_seen().map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()),
            })
        })
        .collect();

    let mut body = serde_json::json!({
        "epoch": snapshot.epoch,
        "uptime_s": state.uptime_secs(),
        "servers": servers,
    });

    if details {
        let map = body.as_object_mut().expect("status body is always a JSON object");
        map.insert("metrics_cache_entries".to_string(), serde_json::json!(snapshot.metrics_cache.len()));
        map.insert("bridge_cache_entries".to_string(), serde_json::json!(snapshot.bridge_cache.len()));
        map.insert("bridge_endpoints".to_string(), serde_json::json!(snapshot.config.bridge_endpoints));
    }

    body
}

async fn conf_dispatch(subcommand: Option<&str>, args: &serde_json::Value, state: &Arc<AppState>) -> Result<serde_json::Value, serde_json::Value> {
    match subcommand {
        Some("reload") => match state.reload() {
            Ok(epoch) => Ok(serde_json::json!({"reloaded": true, "epoch": epoch})),
            Err(e) => Err(err_envelope(ERR_CONF_RELOAD, e.to_string())),
        },
        Some("ls") => {
            let snapshot = state.snapshot.load();
            let servers: Vec<&str> = snapshot.servers.iter().map(|s| s.config.name.as_str()).collect();
            Ok(serde_json::json!({"servers": servers}))
        }
        Some("get") => {
            let key = args.get("key").and_then(|v| v.as_str());
            Ok(conf_get(state, key))
        }
        Some("set") => conf_set(state, args).await,
        Some(other) => Err(err_envelope(ERR_UNKNOWN_SUBCOMMAND, format!("conf: unknown subcommand {other:?}"))),
        None => Err(err_envelope(ERR_UNKNOWN_SUBCOMMAND, "conf: subcommand required")),
    }
}

/// Without a key, returns the whole (redacted) configuration; with one,
/// looks up a single dotted top-level field.
fn conf_get(state: &Arc<AppState>, key: Option<&str>) -> serde_json::Value {
    let snapshot = state.snapshot.load();
    let c = &snapshot.config;
    let whole = serde_json::json!({
        "host": c.host,
        "metrics_port": c.metrics_port,
        "bridge_port": c.bridge_port,
        "management_port": c.management_port,
        "blocking_timeout_secs": c.blocking_timeout.as_secs(),
        "compression": c.compression,
        "bridge_endpoints": c.bridge_endpoints,
        "servers": c.servers.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
    });
    match key {
        None => whole,
        Some(k) => whole.get(k).cloned().unwrap_or(serde_json::Value::Null),
    }
}

/// Writes a single top-level scalar key into the TOML document on disk and
/// reloads. The write lands regardless of whether the key is
/// restart-required; the reload then reports `RestartRequired` if so,
/// matching a real operator's "edit file, then hup" workflow.
async fn conf_set(state: &Arc<AppState>, args: &serde_json::Value) -> Result<serde_json::Value, serde_json::Value> {
    let key = args.get("key").and_then(|v| v.as_str()).ok_or_else(|| err_envelope(ERR_CONF_SET, "conf set requires args.key"))?;
    let value = args.get("value").ok_or_else(|| err_envelope(ERR_CONF_SET, "conf set requires args.value"))?;

    let path = state.config_path.clone();
    let text = tokio::fs::read_to_string(&path).await.map_err(|e| err_envelope(ERR_CONF_SET, format!("reading config: {e}")))?;
    let mut doc: toml::Value = text.parse().map_err(|e| err_envelope(ERR_CONF_SET, format!("parsing config: {e}")))?;
    let toml_value: toml::Value = serde_json::from_value(value.clone()).map_err(|e| err_envelope(ERR_CONF_SET, format!("unsupported value: {e}")))?;

    match doc.as_table_mut() {
        Some(table) => {
            table.insert(key.to_string(), toml_value);
        }
        None => return Err(err_envelope(ERR_CONF_SET, "config file is not a TOML table")),
    }

    let rendered = toml::to_string_pretty(&doc).map_err(|e| err_envelope(ERR_CONF_SET, format!("serializing config: {e}")))?;
    tokio::fs::write(&path, rendered).await.map_err(|e| err_envelope(ERR_CONF_SET, format!("writing config: {e}")))?;

    match state.reload() {
        Ok(epoch) => Ok(serde_json::json!({"set": key, "epoch": epoch})),
        Err(e) => Err(err_envelope(ERR_CONF_RELOAD, format!("wrote {key} but reload failed: {e}"))),
    }
}
