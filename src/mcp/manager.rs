//! MCP client manager.
//!
//! Owns the set of configured external tool servers, drives their
//! connect/handshake lifecycle, and exposes the unified, filtered tool
//! catalog. Tools are advertised under `"<server>__<tool>"` so clashing
//! names on different servers stay unique.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::McpServerConfig;
use crate::error::{PicoError, Result};
use crate::metrics::recorder;

use super::client::McpConnection;
use super::types::{
    CallToolParams, CallToolResult, ClientInfo, InitializeParams, InitializeResult, McpToolDef,
    ServerState, ToolsListResult, PROTOCOL_VERSION,
};

/// Default per-tool call timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive timeouts after which an unresponsive subprocess is killed.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 2;

/// Reconnect backoff: base and cap, seconds.
const RECONNECT_BASE_SECS: u64 = 2;
const RECONNECT_CAP_SECS: u64 = 300;

/// Separator between server prefix and tool name in the external catalog.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// One managed server record.
pub struct McpServer {
    pub name: String,
    pub config: McpServerConfig,
    pub state: ServerState,
    pub tools: Vec<McpToolDef>,
    pub capabilities: serde_json::Value,
    pub last_error: Option<String>,
    connection: Option<Arc<McpConnection>>,
    consecutive_timeouts: u32,
    reconnect_attempts: u32,
}

impl McpServer {
    fn new(name: &str, config: McpServerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            state: ServerState::Disconnected,
            tools: Vec::new(),
            capabilities: serde_json::Value::Null,
            last_error: None,
            connection: None,
            consecutive_timeouts: 0,
            reconnect_attempts: 0,
        }
    }

    /// Allow-list, when non-empty, is authoritative; else the deny-list
    /// applies.
    fn is_tool_allowed(&self, tool_name: &str) -> bool {
        if !self.config.tool_allow_list.is_empty() {
            return self.config.tool_allow_list.iter().any(|t| t == tool_name);
        }
        !self.config.tool_deny_list.iter().any(|t| t == tool_name)
    }

    fn is_workspace_allowed(&self, workspace: &str) -> bool {
        if !self.config.workspace_allow_list.is_empty() {
            return self
                .config
                .workspace_allow_list
                .iter()
                .any(|w| w == workspace);
        }
        !self
            .config
            .workspace_deny_list
            .iter()
            .any(|w| w == workspace)
    }

    fn tool_timeout(&self, manager_default: Duration) -> Duration {
        if self.config.tool_timeout_secs > 0 {
            Duration::from_secs(self.config.tool_timeout_secs)
        } else {
            manager_default
        }
    }
}

/// Summary of one server for the status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ServerSummary {
    pub name: String,
    pub state: ServerState,
    pub tools: Vec<String>,
    pub last_error: Option<String>,
}

/// Manager over all configured MCP servers.
pub struct McpManager {
    servers: Arc<RwLock<HashMap<String, McpServer>>>,
    default_tool_timeout: Duration,
    client_info: ClientInfo,
    stopping: Arc<AtomicBool>,
}

impl McpManager {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TOOL_TIMEOUT)
    }

    pub fn with_timeout(default_tool_timeout: Duration) -> Self {
        Self {
            servers: Arc::new(RwLock::new(HashMap::new())),
            default_tool_timeout,
            client_info: ClientInfo {
                name: "picoclaw".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a server. It stays `Disconnected` until [`connect`] runs.
    ///
    /// [`connect`]: McpManager::connect
    pub async fn add_server(&self, name: &str, config: McpServerConfig) -> Result<()> {
        if config.command.is_empty() && config.url.is_empty() {
            return Err(PicoError::Config(format!(
                "MCP server '{}' needs either a command or a url",
                name
            )));
        }
        let mut servers = self.servers.write().await;
        servers.insert(name.to_string(), McpServer::new(name, config));
        Ok(())
    }

    /// Remove a server, shutting down its transport if live.
    pub async fn remove_server(&self, name: &str) {
        let removed = self.servers.write().await.remove(name);
        if let Some(server) = removed {
            if let Some(connection) = server.connection {
                connection.shutdown().await;
            }
        }
    }

    /// Connect one server: open the transport, run the `initialize`
    /// handshake, then `tools/list`. Only after both succeed does the server
    /// reach `Ready` and its tools become visible in the catalog.
    pub async fn connect(&self, name: &str) -> Result<()> {
        let config = {
            let mut servers = self.servers.write().await;
            let server = servers
                .get_mut(name)
                .ok_or_else(|| PicoError::NotFound(format!("MCP server '{}'", name)))?;
            server.state = ServerState::Connecting;
            server.config.clone()
        };

        match self.handshake(name, &config).await {
            Ok((connection, init, tools)) => {
                let mut servers = self.servers.write().await;
                if let Some(server) = servers.get_mut(name) {
                    info!(server = name, tools = tools.len(), "MCP server ready");
                    server.state = ServerState::Ready;
                    server.capabilities = init.capabilities;
                    server.tools = tools;
                    server.connection = Some(connection);
                    server.last_error = None;
                    server.consecutive_timeouts = 0;
                    server.reconnect_attempts = 0;
                }
                Ok(())
            }
            Err(err) => {
                let mut servers = self.servers.write().await;
                if let Some(server) = servers.get_mut(name) {
                    warn!(server = name, error = %err, "MCP connect failed");
                    server.state = ServerState::Failed;
                    server.last_error = Some(err.to_string());
                    server.reconnect_attempts += 1;
                }
                Err(err)
            }
        }
    }

    async fn handshake(
        &self,
        name: &str,
        config: &McpServerConfig,
    ) -> Result<(Arc<McpConnection>, InitializeResult, Vec<McpToolDef>)> {
        let connection = if !config.url.is_empty() {
            Arc::new(McpConnection::connect_http(name, &config.url, &config.headers))
        } else {
            Arc::new(
                McpConnection::connect_stdio(name, &config.command, &config.args, &config.env)
                    .await?,
            )
        };

        let timeout = if config.tool_timeout_secs > 0 {
            Duration::from_secs(config.tool_timeout_secs)
        } else {
            self.default_tool_timeout
        };

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: self.client_info.clone(),
        };
        let init_value = connection
            .request("initialize", Some(serde_json::to_value(&params)?), timeout)
            .await?;
        let init: InitializeResult = serde_json::from_value(init_value)
            .map_err(|e| PicoError::Parse(format!("{}: initialize result: {}", name, e)))?;

        let tools_value = connection.request("tools/list", None, timeout).await?;
        let tools: ToolsListResult = serde_json::from_value(tools_value)
            .map_err(|e| PicoError::Parse(format!("{}: tools/list result: {}", name, e)))?;

        Ok((connection, init, tools.tools))
    }

    /// Connect every registered server, retrying failed ones with capped
    /// exponential backoff until shutdown. Returns after the first pass;
    /// retries continue in a background task.
    pub async fn start(self: &Arc<Self>) {
        let names: Vec<String> = self.servers.read().await.keys().cloned().collect();
        for name in &names {
            let _ = self.connect(name).await;
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(RECONNECT_BASE_SECS)).await;
                if manager.stopping.load(Ordering::SeqCst) {
                    break;
                }
                let retry: Vec<(String, u32)> = {
                    let servers = manager.servers.read().await;
                    servers
                        .values()
                        .filter(|s| {
                            matches!(s.state, ServerState::Failed | ServerState::Disconnected)
                        })
                        .map(|s| (s.name.clone(), s.reconnect_attempts))
                        .collect()
                };
                for (name, attempts) in retry {
                    let delay =
                        (RECONNECT_BASE_SECS << attempts.min(8)).min(RECONNECT_CAP_SECS);
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                    if manager.stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    let _ = manager.connect(&name).await;
                }
            }
        });
    }

    /// Shut down all transports and the reconnect loop.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let mut servers = self.servers.write().await;
        for server in servers.values_mut() {
            if let Some(connection) = server.connection.take() {
                connection.shutdown().await;
            }
            server.state = ServerState::Disconnected;
        }
    }

    /// Invoke a tool by server and original (unprefixed) name.
    ///
    /// Applies the per-server timeout override (manager default otherwise).
    /// Two consecutive timeouts mark the subprocess unresponsive: it is
    /// killed and the server re-enters `Disconnected` for the next connect
    /// cycle.
    pub async fn call_tool(
        &self,
        server_name: &str,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<CallToolResult> {
        let (connection, timeout) = {
            let servers = self.servers.read().await;
            let server = servers
                .get(server_name)
                .ok_or_else(|| PicoError::NotFound(format!("MCP server '{}'", server_name)))?;
            if server.state != ServerState::Ready {
                return Err(PicoError::Mcp(format!(
                    "server '{}' is {}",
                    server_name,
                    server.state.as_str()
                )));
            }
            let connection = server
                .connection
                .clone()
                .ok_or_else(|| PicoError::ServerGone(server_name.to_string()))?;
            (connection, server.tool_timeout(self.default_tool_timeout))
        };

        let params = CallToolParams {
            name: tool_name.to_string(),
            arguments: Some(args),
        };
        let result = connection
            .request("tools/call", Some(serde_json::to_value(&params)?), timeout)
            .await;

        match result {
            Ok(value) => {
                self.note_call_outcome(server_name, false).await;
                let call_result: CallToolResult = serde_json::from_value(value)
                    .map_err(|e| PicoError::Parse(format!("{}: tools/call result: {}", server_name, e)))?;
                if call_result.is_error {
                    recorder().mcp_tool_calls.inc(&[server_name, "error"]);
                    let text = call_result.text();
                    return Err(PicoError::Tool(if text.is_empty() {
                        format!("{}__{} returned an error", server_name, tool_name)
                    } else {
                        text
                    }));
                }
                recorder().mcp_tool_calls.inc(&[server_name, "success"]);
                Ok(call_result)
            }
            Err(err) => {
                let timed_out = matches!(err, PicoError::Timeout(_));
                let gone = matches!(err, PicoError::ServerGone(_));
                recorder().mcp_tool_calls.inc(&[
                    server_name,
                    if timed_out { "timeout" } else { "error" },
                ]);
                if timed_out {
                    self.note_call_outcome(server_name, true).await;
                }
                if gone {
                    self.mark_disconnected(server_name).await;
                }
                Err(err)
            }
        }
    }

    /// Track consecutive timeouts; kill the server when it stops responding.
    async fn note_call_outcome(&self, server_name: &str, timed_out: bool) {
        let kill = {
            let mut servers = self.servers.write().await;
            let Some(server) = servers.get_mut(server_name) else {
                return;
            };
            if timed_out {
                server.consecutive_timeouts += 1;
                server.consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS
            } else {
                server.consecutive_timeouts = 0;
                false
            }
        };

        if kill {
            warn!(
                server = server_name,
                "MCP server unresponsive after consecutive timeouts, terminating"
            );
            self.mark_disconnected(server_name).await;
        }
    }

    async fn mark_disconnected(&self, server_name: &str) {
        let connection = {
            let mut servers = self.servers.write().await;
            let Some(server) = servers.get_mut(server_name) else {
                return;
            };
            server.state = ServerState::Disconnected;
            server.tools.clear();
            server.consecutive_timeouts = 0;
            server.connection.take()
        };
        if let Some(connection) = connection {
            connection.shutdown().await;
        }
    }

    /// All tools from `Ready` servers that pass the per-server allow/deny
    /// lists, prefixed `"<server>__<tool>"`.
    pub async fn get_all_tools(&self) -> Vec<McpToolDef> {
        self.collect_tools(None).await
    }

    /// Like [`get_all_tools`], additionally applying each server's workspace
    /// allow/deny lists for `workspace`.
    ///
    /// [`get_all_tools`]: McpManager::get_all_tools
    pub async fn get_tools_for_workspace(&self, workspace: &str) -> Vec<McpToolDef> {
        self.collect_tools(Some(workspace)).await
    }

    async fn collect_tools(&self, workspace: Option<&str>) -> Vec<McpToolDef> {
        let servers = self.servers.read().await;
        let mut tools = Vec::new();
        let mut names: Vec<&String> = servers.keys().collect();
        names.sort();

        for name in names {
            let server = &servers[name];
            if server.state != ServerState::Ready {
                continue;
            }
            if let Some(ws) = workspace {
                if !server.is_workspace_allowed(ws) {
                    continue;
                }
            }
            for tool in &server.tools {
                if !server.is_tool_allowed(&tool.name) {
                    continue;
                }
                tools.push(McpToolDef {
                    name: format!("{}{}{}", server.name, TOOL_NAME_SEPARATOR, tool.name),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                });
            }
        }
        tools
    }

    /// Split a prefixed catalog name back into `(server, tool)`.
    pub fn split_tool_name(prefixed: &str) -> Option<(&str, &str)> {
        prefixed.split_once(TOOL_NAME_SEPARATOR)
    }

    /// Per-server status summaries for `/api/status`.
    pub async fn server_summaries(&self) -> Vec<ServerSummary> {
        let servers = self.servers.read().await;
        let mut summaries: Vec<ServerSummary> = servers
            .values()
            .map(|s| ServerSummary {
                name: s.name.clone(),
                state: s.state,
                tools: s.tools.iter().map(|t| t.name.clone()).collect(),
                last_error: s.last_error.clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Test seam: insert a server already in `Ready` state with the given
    /// tools, bypassing the transport.
    #[cfg(test)]
    pub(crate) async fn inject_ready_server(
        &self,
        name: &str,
        config: McpServerConfig,
        tools: Vec<McpToolDef>,
    ) {
        let mut server = McpServer::new(name, config);
        server.state = ServerState::Ready;
        server.tools = tools;
        self.servers.write().await.insert(name.to_string(), server);
    }
}

impl Default for McpManager {
    fn default() -> Self {
        Self::new()
    }
}
