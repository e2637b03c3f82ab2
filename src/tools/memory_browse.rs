//! Date-ordered long-term memory retrieval tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{PicoError, Result};
use crate::memory::{MemoryManager, SortOrder};

use super::memory_search::format_results;
use super::types::{Tool, ToolContext, ToolOutput};

const DEFAULT_LIMIT: usize = 10;

/// `memory_browse`: retrieve memories about a topic ordered by date.
pub struct MemoryBrowseTool {
    memory: Arc<MemoryManager>,
}

impl MemoryBrowseTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryBrowseTool {
    fn name(&self) -> &str {
        "memory_browse"
    }

    fn description(&self) -> &str {
        "Browse long-term memory about a topic in date order (newest first by \
         default). Use memory_search instead when relevance matters more than \
         the date."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "Topic to browse memories for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results to return (default 10)"
                },
                "order": {
                    "type": "string",
                    "enum": ["asc", "desc"],
                    "description": "Date order: oldest first (asc) or newest first (desc)"
                }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let topic = args
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| PicoError::Tool("missing 'topic' argument".into()))?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LIMIT);
        let order = args
            .get("order")
            .and_then(Value::as_str)
            .map(SortOrder::parse)
            .unwrap_or_default();

        let workspace = ctx
            .workspace
            .as_deref()
            .ok_or_else(|| PicoError::Tool("no workspace in tool context".into()))?;

        let results = self
            .memory
            .search_by_date(workspace, topic, limit, order)
            .await?;
        Ok(ToolOutput::llm_only(format_results(&results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_requires_topic() {
        let tool = MemoryBrowseTool::new(Arc::new(MemoryManager::disabled()));
        let ctx = ToolContext::new().with_workspace("w1");
        let result = tool.execute(json!({}), &ctx).await;
        assert!(matches!(result, Err(PicoError::Tool(_))));
    }

    #[tokio::test]
    async fn test_execute_disabled_memory() {
        let tool = MemoryBrowseTool::new(Arc::new(MemoryManager::disabled()));
        let ctx = ToolContext::new().with_workspace("w1");
        let output = tool
            .execute(json!({"topic": "chores", "order": "asc"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.for_llm, "No relevant memories found.");
    }

    #[test]
    fn test_parameters_declare_order_enum() {
        let tool = MemoryBrowseTool::new(Arc::new(MemoryManager::disabled()));
        let params = tool.parameters();
        assert_eq!(params["properties"]["order"]["enum"][0], "asc");
        assert_eq!(params["required"][0], "topic");
    }
}
