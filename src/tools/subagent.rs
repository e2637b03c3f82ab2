//! Synchronous subagent tool.
//!
//! Runs a recursive mini-turn inside the current turn: fresh history, a
//! restricted tool set derived from the selected skill, and the result fed
//! straight back to the calling LLM.

use std::sync::Weak;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::AgentLoop;
use crate::error::{PicoError, Result};
use crate::metrics::RequestContext;

use super::types::{Tool, ToolContext, ToolOutput};

/// `subagent`: delegate a task and wait for the result.
pub struct SubagentTool {
    agent: Weak<AgentLoop>,
}

impl SubagentTool {
    pub fn new(agent: Weak<AgentLoop>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        "subagent"
    }

    fn description(&self) -> &str {
        "Delegate a focused task to a subagent and wait for its result. The \
         subagent starts with fresh context and only the tools its role \
         allows. Use spawn instead for long-running work."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Task for the subagent to complete"
                },
                "role": {
                    "type": "string",
                    "description": "Skill/role name selecting the subagent's prompt and tools"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let task = args
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| PicoError::Tool("missing 'task' argument".into()))?;
        let role = args.get("role").and_then(Value::as_str).unwrap_or("general");

        let agent = self
            .agent
            .upgrade()
            .ok_or_else(|| PicoError::Tool("agent is no longer available".into()))?;

        let parent_ctx = RequestContext::new(ctx.agent_type)
            .with_workspace(ctx.workspace.as_deref().unwrap_or(""))
            .with_channel(ctx.channel.as_deref().unwrap_or(""));

        let result = agent.run_subagent(task, role, &parent_ctx).await?;
        Ok(ToolOutput::llm_only(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_task_argument() {
        let tool = SubagentTool::new(Weak::new());
        let result = tool.execute(json!({}), &ToolContext::new()).await;
        assert!(matches!(result, Err(PicoError::Tool(_))));
    }

    #[tokio::test]
    async fn test_dead_agent_reference() {
        let tool = SubagentTool::new(Weak::new());
        let result = tool
            .execute(json!({"task": "do something"}), &ToolContext::new())
            .await;
        assert!(matches!(result, Err(PicoError::Tool(_))));
    }

    #[test]
    fn test_parameters_shape() {
        let tool = SubagentTool::new(Weak::new());
        let params = tool.parameters();
        assert_eq!(params["required"][0], "task");
        assert!(params["properties"]["role"].is_object());
    }
}
