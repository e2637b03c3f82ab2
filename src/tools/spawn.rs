//! Background subagent tool.
//!
//! Returns immediately with a task id; the subagent manager executes the
//! task on its worker pool and the completion callback delivers the result
//! as an outbound message on the originating channel.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::error;

use crate::agent::AgentLoop;
use crate::bus::{MessageBus, OutboundMessage};
use crate::error::{PicoError, Result};
use crate::metrics::RequestContext;
use crate::subagent::{SubagentManager, TaskStatus};

use super::types::{Tool, ToolContext, ToolOutput};

/// `spawn`: run a delegated task in the background.
pub struct SpawnTool {
    agent: Weak<AgentLoop>,
    manager: Arc<SubagentManager>,
    bus: MessageBus,
}

impl SpawnTool {
    pub fn new(agent: Weak<AgentLoop>, manager: Arc<SubagentManager>, bus: MessageBus) -> Self {
        Self {
            agent,
            manager,
            bus,
        }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a delegated background task. Returns a task id immediately; \
         the user is notified on this channel when the task completes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Task description for delegated execution"
                },
                "role": {
                    "type": "string",
                    "description": "Skill/role name for the subagent"
                },
                "label": {
                    "type": "string",
                    "description": "Optional short task label"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let task_text = args
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| PicoError::Tool("missing 'task' argument".into()))?
            .to_string();
        let role = args
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("general")
            .to_string();
        let label = args
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let truncated: String = task_text.chars().take(30).collect();
                if truncated.len() < task_text.len() {
                    format!("{}...", truncated)
                } else {
                    truncated
                }
            });

        let channel = ctx
            .channel
            .clone()
            .ok_or_else(|| PicoError::Tool("no channel in tool context".into()))?;
        let chat_id = ctx
            .chat_id
            .clone()
            .ok_or_else(|| PicoError::Tool("no chat_id in tool context".into()))?;
        let parent_key = ctx
            .session_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}", channel, chat_id));

        let agent = self.agent.clone();
        let parent_ctx = RequestContext::new(ctx.agent_type)
            .with_workspace(ctx.workspace.as_deref().unwrap_or(""))
            .with_channel(&channel);
        let work_task = task_text.clone();
        let work_role = role.clone();
        let work = Box::pin(async move {
            let agent = agent
                .upgrade()
                .ok_or_else(|| PicoError::Tool("agent is no longer available".into()))?;
            agent.run_subagent(&work_task, &work_role, &parent_ctx).await
        });

        let bus = self.bus.clone();
        let reply_label = label.clone();
        let on_complete = Box::new(move |status: TaskStatus, text: String| {
            let body = match status {
                TaskStatus::Done => {
                    format!("[Background task '{}' completed]\n\n{}", reply_label, text)
                }
                _ => format!("[Background task '{}' failed]\n\n{}", reply_label, text),
            };
            if let Err(e) = bus.publish_outbound(OutboundMessage::new(&channel, &chat_id, &body)) {
                error!(error = %e, "Failed to publish spawn completion message");
            }
        });

        let task_id = self
            .manager
            .submit(&parent_key, &role, &task_text, work, Some(on_complete))
            .await?;

        Ok(ToolOutput::llm_only(format!(
            "Spawned background task '{}' (id: {}). The user will be notified when it completes.",
            label, task_id
        )))
    }
}
