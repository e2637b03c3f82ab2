//! JSON-RPC 2.0 and MCP protocol wire types.
//!
//! The Model Context Protocol speaks JSON-RPC 2.0. Stdio servers use
//! line-delimited messages over stdin/stdout; HTTP servers accept the same
//! request bodies via POST.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// JSON-RPC 2.0 envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The response id as an integer, when present and integral.
    pub fn id_i64(&self) -> Option<i64> {
        self.id.as_ref().and_then(Value::as_i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

// ============================================================================
// MCP protocol payloads
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Concatenate all `text`-typed content items with newline separators.
    /// Non-text items are skipped here and forwarded unchanged by callers
    /// that need them.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One content item of a tool result. Closed sum discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ToolContent {
    pub fn text_item(text: &str) -> Self {
        Self {
            content_type: "text".to_string(),
            text: Some(text.to_string()),
            data: None,
            mime_type: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        if self.content_type == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

/// Lifecycle state of a managed MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Disconnected,
    Connecting,
    Ready,
    Failed,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Disconnected => "disconnected",
            ServerState::Connecting => "connecting",
            ServerState::Ready => "ready",
            ServerState::Failed => "failed",
        }
    }
}
