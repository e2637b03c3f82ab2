//! MCP transport connections.
//!
//! A [`McpConnection`] owns one live transport to an external tool server:
//! either a spawned child process speaking line-delimited JSON-RPC over
//! stdin/stdout, or an HTTP endpoint accepting the same bodies via POST.
//!
//! Stdio demultiplexing: every request gets a fresh integer id and a oneshot
//! slot in the pending table; a single reader task parses stdout lines and
//! completes the matching slot. Malformed lines are dropped (counted),
//! responses with unknown ids are logged and discarded, and process exit
//! fails every pending request with `ServerGone`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{PicoError, Result};
use crate::metrics::recorder;

use super::types::{JsonRpcRequest, JsonRpcResponse};

type PendingTable = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

enum TransportKind {
    Stdio {
        stdin: Mutex<ChildStdin>,
        child: Mutex<Child>,
        pending: PendingTable,
        alive: Arc<AtomicBool>,
    },
    Http {
        client: reqwest::Client,
        url: String,
        headers: HashMap<String, String>,
    },
}

/// One live transport to an MCP server.
pub struct McpConnection {
    server_name: String,
    kind: TransportKind,
    next_id: AtomicI64,
}

impl McpConnection {
    /// Spawn a stdio MCP server as a child process.
    ///
    /// The reader task runs until the child's stdout closes.
    pub async fn connect_stdio(
        server_name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| {
            PicoError::Mcp(format!("failed to spawn '{}': {}", command, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PicoError::Mcp("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PicoError::Mcp("child stdout unavailable".into()))?;

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader_pending = Arc::clone(&pending);
        let reader_alive = Arc::clone(&alive);
        let reader_name = server_name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let response: JsonRpcResponse = match serde_json::from_str(line) {
                            Ok(r) => r,
                            Err(e) => {
                                recorder().mcp_parse_errors.inc(&[&reader_name]);
                                warn!(
                                    server = %reader_name,
                                    error = %e,
                                    "Dropping malformed JSON-RPC line"
                                );
                                continue;
                            }
                        };
                        let Some(id) = response.id_i64() else {
                            debug!(server = %reader_name, "Response without integer id, discarding");
                            continue;
                        };
                        let sender = reader_pending.lock().await.remove(&id);
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => {
                                debug!(
                                    server = %reader_name,
                                    id,
                                    "Response for unknown request id, discarding"
                                );
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }

            // Stdout closed: the subprocess is gone. Fail all in-flight calls.
            reader_alive.store(false, Ordering::SeqCst);
            let mut pending = reader_pending.lock().await;
            let count = pending.len();
            pending.clear();
            if count > 0 {
                info!(
                    server = %reader_name,
                    dropped = count,
                    "MCP server exited, dropped pending requests"
                );
            }
        });

        Ok(Self {
            server_name: server_name.to_string(),
            kind: TransportKind::Stdio {
                stdin: Mutex::new(stdin),
                child: Mutex::new(child),
                pending,
                alive,
            },
            next_id: AtomicI64::new(1),
        })
    }

    /// Create an HTTP transport. No handshake happens here; the manager
    /// drives `initialize` over this connection like any other request.
    pub fn connect_http(server_name: &str, url: &str, headers: &HashMap<String, String>) -> Self {
        Self {
            server_name: server_name.to_string(),
            kind: TransportKind::Http {
                client: reqwest::Client::new(),
                url: url.to_string(),
                headers: headers.clone(),
            },
            next_id: AtomicI64::new(1),
        }
    }

    /// Whether the underlying transport can still carry requests.
    pub fn is_alive(&self) -> bool {
        match &self.kind {
            TransportKind::Stdio { alive, .. } => alive.load(Ordering::SeqCst),
            TransportKind::Http { .. } => true,
        }
    }

    /// Allocate the next request id.
    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a JSON-RPC request and await its response within `timeout`.
    ///
    /// # Errors
    /// - `Timeout` when the deadline fires (the pending slot is removed)
    /// - `ServerGone` when the transport died underneath the call
    /// - `Mcp` for protocol-level error responses
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let id = self.allocate_id();
        let request = JsonRpcRequest::new(id, method, params);

        let response = match &self.kind {
            TransportKind::Stdio {
                stdin,
                pending,
                alive,
                ..
            } => {
                if !alive.load(Ordering::SeqCst) {
                    return Err(PicoError::ServerGone(self.server_name.clone()));
                }

                let (tx, rx) = oneshot::channel();
                pending.lock().await.insert(id, tx);

                let mut line = serde_json::to_string(&request)?;
                line.push('\n');
                {
                    let mut stdin = stdin.lock().await;
                    if let Err(e) = stdin.write_all(line.as_bytes()).await {
                        pending.lock().await.remove(&id);
                        return Err(PicoError::ServerGone(format!(
                            "{}: write failed: {}",
                            self.server_name, e
                        )));
                    }
                    if let Err(e) = stdin.flush().await {
                        pending.lock().await.remove(&id);
                        return Err(PicoError::ServerGone(format!(
                            "{}: flush failed: {}",
                            self.server_name, e
                        )));
                    }
                }

                match tokio::time::timeout(timeout, rx).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(_)) => {
                        // Sender dropped: reader task shut down.
                        return Err(PicoError::ServerGone(self.server_name.clone()));
                    }
                    Err(_) => {
                        pending.lock().await.remove(&id);
                        return Err(PicoError::Timeout(format!(
                            "{}: {} timed out after {:?}",
                            self.server_name, method, timeout
                        )));
                    }
                }
            }
            TransportKind::Http {
                client,
                url,
                headers,
            } => {
                let mut req = client.post(url).json(&request).timeout(timeout);
                for (k, v) in headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                let http_response = req.send().await.map_err(|e| {
                    if e.is_timeout() {
                        PicoError::Timeout(format!("{}: {} timed out", self.server_name, method))
                    } else {
                        PicoError::Mcp(format!("{}: {}", self.server_name, e))
                    }
                })?;
                http_response
                    .json::<JsonRpcResponse>()
                    .await
                    .map_err(|e| PicoError::Parse(format!("{}: {}", self.server_name, e)))?
            }
        };

        if let Some(error) = response.error {
            return Err(PicoError::Mcp(format!(
                "{}: {} failed: {} (code {})",
                self.server_name, method, error.message, error.code
            )));
        }
        response
            .result
            .ok_or_else(|| PicoError::Parse(format!("{}: response had no result", self.server_name)))
    }

    /// Terminate the transport. Stdio children are killed; pending requests
    /// are failed by the reader task when stdout closes.
    pub async fn shutdown(&self) {
        if let TransportKind::Stdio { child, alive, .. } = &self.kind {
            alive.store(false, Ordering::SeqCst);
            let mut child = child.lock().await;
            if let Err(e) = child.kill().await {
                debug!(server = %self.server_name, error = %e, "Kill on shutdown failed");
            }
        }
    }
}
