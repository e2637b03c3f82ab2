//! Webhook / health HTTP surface.
//!
//! A minimal raw-TCP HTTP server exposing liveness, readiness, metrics, the
//! dashboard JSON endpoints, and external event ingress:
//!
//! - `GET /health` — liveness plus uptime
//! - `GET /ready` — readiness gate
//! - `GET /metrics` — Prometheus text exposition
//! - `GET /api/status` — sessions, MCP servers, bus drops
//! - `GET /api/activity` — recent bus activity ring
//! - `GET /api/config` — redacted runtime config
//! - `POST /webhook/{id}` — external event ingress
//!
//! GitHub-format webhooks must carry `X-Hub-Signature-256: sha256=<hex>`
//! computed as HMAC-SHA256 of the raw body with the configured secret;
//! signatures are compared in constant time.
//!
//! Uses raw TCP + manual HTTP parsing to keep the binary footprint small;
//! request sizes are bounded before any allocation-heavy work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::MessageBus;
use crate::config::{Config, WebhookFormat};
use crate::error::{PicoError, Result};
use crate::mcp::McpManager;
use crate::metrics::recorder;
use crate::session::{build_session_key, DmScope, Peer, SessionKeyParams, SessionManager};

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed request body size (1 MB).
const MAX_BODY_SIZE: usize = 1_048_576;

/// Maximum allowed header section size (8 KB).
const MAX_HEADER_SIZE: usize = 8_192;

/// Constant-time string comparison to prevent timing side channels.
///
/// Always walks the full length of both inputs; returns `false` immediately
/// only on a length mismatch (length is not secret for hex signatures).
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify a GitHub-style `X-Hub-Signature-256` header against the raw body.
///
/// Returns `Err(Unauthorized)` for a bad or missing signature and
/// `Err(Parse)` for a malformed header.
pub fn verify_github_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<()> {
    let header = header.ok_or_else(|| PicoError::Unauthorized("missing signature".into()))?;
    let hex = header
        .strip_prefix("sha256=")
        .ok_or_else(|| PicoError::Parse("invalid signature format".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PicoError::Config("invalid webhook secret".into()))?;
    mac.update(body);
    let expected: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    if constant_time_eq(hex, &expected) {
        Ok(())
    } else {
        Err(PicoError::Unauthorized("invalid signature".into()))
    }
}

/// Shared state behind the HTTP surface.
pub struct GatewayState {
    pub config: Config,
    pub bus: MessageBus,
    pub session_manager: SessionManager,
    pub mcp: Arc<McpManager>,
    pub ready: AtomicBool,
    start_time: Instant,
}

impl GatewayState {
    pub fn new(
        config: Config,
        bus: MessageBus,
        session_manager: SessionManager,
        mcp: Arc<McpManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            bus,
            session_manager,
            mcp,
            ready: AtomicBool::new(false),
            start_time: Instant::now(),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

/// One parsed HTTP request.
#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

/// One response ready to serialize.
struct HttpResponse {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    body: String,
}

impl HttpResponse {
    fn json(status: u16, reason: &'static str, body: String) -> Self {
        Self {
            status,
            reason,
            content_type: "application/json",
            body,
        }
    }

    fn ok_json(body: String) -> Self {
        Self::json(200, "OK", body)
    }

    fn text(status: u16, reason: &'static str, body: String) -> Self {
        Self {
            status,
            reason,
            content_type: "text/plain; charset=utf-8",
            body,
        }
    }

    fn error(status: u16, reason: &'static str, message: &str) -> Self {
        Self::json(status, reason, format!("{{\"error\":\"{}\"}}", message))
    }

    fn serialize(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason,
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

/// The HTTP server itself.
pub struct GatewayServer {
    state: Arc<GatewayState>,
    shutdown_tx: watch::Sender<bool>,
}

impl GatewayServer {
    pub fn new(state: Arc<GatewayState>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self { state, shutdown_tx }
    }

    /// Bind and serve until [`stop`] is called.
    ///
    /// [`stop`]: GatewayServer::stop
    pub async fn serve(&self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.gateway.host, self.state.config.gateway.port
        );
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, "Gateway HTTP server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway HTTP server stopping");
                        break;
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Accepted connection");
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, state).await {
                                    debug!(error = %e, "Connection handling failed");
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    state: Arc<GatewayState>,
) -> Result<()> {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            let response = HttpResponse::error(400, "Bad Request", "malformed request");
            let _ = stream.write_all(response.serialize().as_bytes()).await;
            return Err(e);
        }
    };

    let response = route(&state, &request).await;
    stream.write_all(response.serialize().as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Read and parse one HTTP request, enforcing size limits.
async fn read_request(stream: &mut tokio::net::TcpStream) -> Result<HttpRequest> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    // Read until the end of the header section.
    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEADER_SIZE {
            return Err(PicoError::Parse("header section too large".into()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(PicoError::Parse("connection closed mid-request".into()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let (method, path, headers) =
        parse_head(&head).ok_or_else(|| PicoError::Parse("invalid request line".into()))?;

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_SIZE {
        return Err(PicoError::Parse("body too large".into()));
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse the request line and headers. Header names are lowercased.
fn parse_head(head: &str) -> Option<(String, String, HashMap<String, String>)> {
    let mut lines = head.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }
    Some((method, path, headers))
}

async fn route(state: &GatewayState, request: &HttpRequest) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let uptime = state.start_time.elapsed().as_secs();
            HttpResponse::ok_json(format!("{{\"status\":\"ok\",\"uptime_seconds\":{}}}", uptime))
        }
        ("GET", "/ready") => {
            if state.ready.load(Ordering::SeqCst) {
                HttpResponse::ok_json("{\"ready\":true}".to_string())
            } else {
                HttpResponse::json(503, "Service Unavailable", "{\"ready\":false}".to_string())
            }
        }
        ("GET", "/metrics") => HttpResponse::text(200, "OK", recorder().render()),
        ("GET", "/api/status") => api_status(state).await,
        ("GET", "/api/activity") => {
            let events = state.bus.monitor();
            match serde_json::to_string(&events) {
                Ok(json) => HttpResponse::ok_json(json),
                Err(_) => HttpResponse::error(500, "Internal Server Error", "serialization failed"),
            }
        }
        ("GET", "/api/config") => api_config(state),
        ("POST", path) if path.starts_with("/webhook/") => {
            let webhook_id = &path["/webhook/".len()..];
            webhook(state, webhook_id, request).await
        }
        ("POST", _) | ("GET", _) => HttpResponse::error(404, "Not Found", "not found"),
        _ => HttpResponse::error(405, "Method Not Allowed", "method not allowed"),
    }
}

async fn api_status(state: &GatewayState) -> HttpResponse {
    let sessions = state.session_manager.active_count().await;
    let servers = state.mcp.server_summaries().await;
    let body = serde_json::json!({
        "sessions_active": sessions,
        "mcp_servers": servers,
        "bus_drops": state.bus.drop_count(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    });
    HttpResponse::ok_json(body.to_string())
}

/// Redacted config view: structure without credentials.
fn api_config(state: &GatewayState) -> HttpResponse {
    let config = &state.config;
    let body = serde_json::json!({
        "workspace": config.workspace,
        "agent_id": config.agents.defaults.agent_id,
        "safety_level": config.agents.defaults.safety_level.as_str(),
        "model_list": config.model_list.iter().map(|m| {
            serde_json::json!({"provider": m.provider, "model": m.model, "api_base": m.api_base})
        }).collect::<Vec<_>>(),
        "mcp_servers": config.tools.mcp_servers.keys().collect::<Vec<_>>(),
        "webhooks": config.gateway.webhooks.keys().collect::<Vec<_>>(),
        "heartbeat_enabled": config.heartbeat.enabled,
        "memory_enabled": config.memory.enabled,
    });
    HttpResponse::ok_json(body.to_string())
}

async fn webhook(state: &GatewayState, webhook_id: &str, request: &HttpRequest) -> HttpResponse {
    let Some(hook) = state.config.gateway.webhooks.get(webhook_id) else {
        return HttpResponse::error(404, "Not Found", "webhook not found");
    };

    let payload_text = match hook.format {
        WebhookFormat::Github => {
            let signature = request.headers.get("x-hub-signature-256").map(String::as_str);
            match verify_github_signature(&hook.secret, &request.body, signature) {
                Ok(()) => {}
                Err(PicoError::Parse(_)) => {
                    return HttpResponse::error(400, "Bad Request", "invalid signature format");
                }
                Err(_) => {
                    return HttpResponse::error(401, "Unauthorized", "invalid signature");
                }
            }
            let event = request
                .headers
                .get("x-github-event")
                .map(String::as_str)
                .unwrap_or("unknown");
            format!(
                "GitHub Webhook Event: {}\nPayload: {}",
                event,
                String::from_utf8_lossy(&request.body)
            )
        }
        WebhookFormat::Json => {
            format!("Webhook Event: {}", String::from_utf8_lossy(&request.body))
        }
    };

    let agent_id = if hook.agent.is_empty() {
        "default"
    } else {
        &hook.agent
    };
    let session_key = match build_session_key(&SessionKeyParams {
        agent_id: agent_id.to_string(),
        channel: "webhook".to_string(),
        peer: Peer::direct(webhook_id),
        dm_scope: DmScope::PerChannelPeer,
    }) {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "Webhook session key derivation failed");
            return HttpResponse::error(500, "Internal Server Error", "internal error");
        }
    };

    let msg = crate::bus::InboundMessage::new("webhook", "system", webhook_id, &payload_text)
        .with_session_key(&session_key);
    if let Err(e) = state.bus.publish_inbound(msg) {
        error!(error = %e, webhook = webhook_id, "Failed to forward webhook event");
        return HttpResponse::error(500, "Internal Server Error", "internal error");
    }

    HttpResponse::text(200, "OK", "OK".to_string())
}
