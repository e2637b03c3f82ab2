//! Relevance-ordered long-term memory retrieval tool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use crate::error::{PicoError, Result};
use crate::memory::{MemoryManager, SearchResult};

use super::types::{Tool, ToolContext, ToolOutput};

const DEFAULT_LIMIT: usize = 5;
const MAX_CONTENT_CHARS: usize = 500;

/// `memory_search`: similarity search over archived sessions.
pub struct MemorySearchTool {
    memory: Arc<MemoryManager>,
}

impl MemorySearchTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory for past conversations relevant to a query. \
         Results are ordered by relevance. Use memory_browse instead when the \
         date matters more than relevance."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results to return (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| PicoError::Tool("missing 'query' argument".into()))?;
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_LIMIT);

        let workspace = ctx
            .workspace
            .as_deref()
            .ok_or_else(|| PicoError::Tool("no workspace in tool context".into()))?;

        let results = self.memory.search(workspace, query, limit, 0).await?;
        Ok(ToolOutput::llm_only(format_results(&results)))
    }
}

/// Render hits as a compact numbered list for the LLM.
pub(crate) fn format_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No relevant memories found.".to_string();
    }

    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        let date = Utc
            .timestamp_opt(result.timestamp(), 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "unknown date".to_string());
        let content = result
            .payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("");
        let truncated: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        out.push_str(&format!("{}. [{}] {}\n", i + 1, date, truncated));
    }
    out
}
