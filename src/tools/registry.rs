//! Tool registry.
//!
//! Maps tool names to executors. Names must be unique across all origins
//! (built-ins, MCP-backed adapters, skill tools); a clash at registration is
//! a configuration error, not a silent override.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::error::{PicoError, Result};
use crate::metrics::recorder;
use crate::providers::ToolDefinition;

use super::types::{Tool, ToolContext, ToolOutput};

/// Registry of executable tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    ///
    /// # Errors
    /// `ConfigError` when a tool with the same name already exists.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(PicoError::Config(format!(
                "duplicate tool name '{}'",
                name
            )));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Remove every tool whose name starts with `prefix`. Used to drop an
    /// MCP server's adapters when it disconnects.
    pub fn unregister_prefixed(&mut self, prefix: &str) {
        self.tools.retain(|name, _| !name.starts_with(prefix));
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of all registered tools, sorted by name for a stable
    /// prompt layout.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.parameters()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions restricted to the given allow-list, preserving only
    /// names that actually exist.
    pub fn definitions_for(&self, allowed: &[String]) -> Vec<ToolDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| allowed.iter().any(|a| a == &d.name))
            .collect()
    }

    /// Execute a tool by name with a per-call timeout.
    ///
    /// Cancelling happens via the timeout future: when the deadline fires,
    /// the executor's future is dropped and a `Timeout` error is returned.
    /// Tool-level failures come back as `Ok` outputs with `is_error` set,
    /// matching the loop contract that tool errors do not abort the turn.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
        timeout: Duration,
    ) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| PicoError::NotFound(format!("tool '{}'", name)))?;

        let start = Instant::now();
        let result = tokio::time::timeout(timeout, tool.execute(args, ctx)).await;
        let elapsed = start.elapsed();

        match result {
            Ok(Ok(output)) => {
                let status = if output.is_error { "error" } else { "success" };
                recorder().record_tool_call(name, ctx.agent_type, status, elapsed);
                debug!(tool = name, status, latency_ms = elapsed.as_millis() as u64, "Tool executed");
                Ok(output)
            }
            Ok(Err(err)) => {
                recorder().record_tool_call(name, ctx.agent_type, "error", elapsed);
                recorder().record_tool_error(name, err.metric_label());
                Ok(ToolOutput::error(format!("Error: {}", err)))
            }
            Err(_) => {
                recorder().record_tool_call(name, ctx.agent_type, "timeout", elapsed);
                recorder().record_tool_error(name, "timeout");
                Err(PicoError::Timeout(format!(
                    "tool '{}' exceeded {:?}",
                    name, timeout
                )))
            }
        }
    }
}
