//! MCP-backed tool adapter.
//!
//! Wraps one catalog entry from the [`McpManager`] as a registry tool. The
//! external name keeps the `"<server>__<tool>"` prefix; the adapter strips
//! it back off when routing the call to the owning server.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PicoError, Result};
use crate::mcp::{McpManager, McpToolDef};

use super::types::{Tool, ToolContext, ToolOutput};

/// One MCP catalog tool exposed through the registry.
pub struct McpToolAdapter {
    /// Prefixed name as advertised to the LLM.
    prefixed_name: String,
    description: String,
    input_schema: Value,
    server_name: String,
    /// Original tool name on the server, without the prefix.
    remote_name: String,
    manager: Arc<McpManager>,
}

impl McpToolAdapter {
    /// Build an adapter from a prefixed catalog entry.
    ///
    /// # Errors
    /// `ConfigError` when the name carries no server prefix.
    pub fn from_catalog_entry(def: &McpToolDef, manager: Arc<McpManager>) -> Result<Self> {
        let (server, remote) = McpManager::split_tool_name(&def.name).ok_or_else(|| {
            PicoError::Config(format!("MCP catalog name '{}' has no server prefix", def.name))
        })?;
        Ok(Self {
            prefixed_name: def.name.clone(),
            description: def.description.clone(),
            input_schema: def.input_schema.clone(),
            server_name: server.to_string(),
            remote_name: remote.to_string(),
            manager,
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.prefixed_name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.input_schema.clone()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let result = self
            .manager
            .call_tool(&self.server_name, &self.remote_name, args)
            .await?;

        let text = result.text();
        Ok(ToolOutput::llm_only(if text.is_empty() {
            "(no output)".to_string()
        } else {
            text
        }))
    }
}

/// Build adapters for every tool currently visible in the manager's catalog
/// for the given workspace.
pub async fn adapters_for_workspace(
    manager: &Arc<McpManager>,
    workspace: &str,
) -> Result<Vec<McpToolAdapter>> {
    let catalog = manager.get_tools_for_workspace(workspace).await;
    catalog
        .iter()
        .map(|def| McpToolAdapter::from_catalog_entry(def, Arc::clone(manager)))
        .collect()
}
