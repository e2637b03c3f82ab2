//! Model Context Protocol client.
//!
//! External tool servers are configured under `tools.mcp_servers` and
//! supervised by the [`McpManager`]: stdio servers are spawned as child
//! processes speaking line-delimited JSON-RPC 2.0, HTTP servers receive the
//! same bodies via POST. After the `initialize` handshake and `tools/list`
//! succeed, a server's tools join the unified catalog under
//! `"<server>__<tool>"` names, filtered by per-server tool and workspace
//! allow/deny lists.

pub mod client;
pub mod manager;
pub mod types;

pub use client::McpConnection;
pub use manager::{McpManager, ServerSummary, DEFAULT_TOOL_TIMEOUT, TOOL_NAME_SEPARATOR};
pub use types::{
    CallToolParams, CallToolResult, ClientInfo, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpToolDef, ServerState, ToolContent,
    ToolsListResult, PROTOCOL_VERSION,
};
