//! Tool types for PicoClaw
//!
//! This module defines the core types for tool execution: the `Tool` trait
//! that all tools implement, the dual-audience `ToolOutput`, and the
//! `ToolContext` threaded into every execution.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::metrics::AgentType;

/// Dual-audience tool result.
///
/// Separates what the LLM sees (`for_llm`) from what goes back out on the
/// originating channel (`for_user`). A silent result produces neither, but
/// the completion is still recorded in metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Content appended to the conversation as the tool message.
    pub for_llm: String,
    /// Content sent as an outbound message. `None` = nothing sent.
    pub for_user: Option<String>,
    /// Neither audience sees anything; completion is still recorded.
    pub silent: bool,
    /// Whether this result represents an error condition.
    pub is_error: bool,
}

impl ToolOutput {
    /// LLM-only result. User sees nothing.
    pub fn llm_only(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            silent: false,
            is_error: false,
        }
    }

    /// Both LLM and user see the same content.
    pub fn user_visible(content: impl Into<String>) -> Self {
        let s = content.into();
        Self {
            for_llm: s.clone(),
            for_user: Some(s),
            silent: false,
            is_error: false,
        }
    }

    /// Different content for LLM vs user.
    pub fn split(for_llm: impl Into<String>, for_user: impl Into<String>) -> Self {
        Self {
            for_llm: for_llm.into(),
            for_user: Some(for_user.into()),
            silent: false,
            is_error: false,
        }
    }

    /// Silent result: recorded, delivered nowhere.
    pub fn silent(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            silent: true,
            is_error: false,
        }
    }

    /// Error result. The LLM sees the error text; the turn continues.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            for_llm: content.into(),
            for_user: None,
            silent: false,
            is_error: true,
        }
    }
}

/// Trait that all tools must implement.
///
/// Tools are executable functions the LLM can call. Executors must honor
/// cancellation: the registry races execution against the per-call timeout,
/// so a well-behaved tool keeps its await points responsive.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::Value;
/// use picoclaw::tools::{Tool, ToolContext, ToolOutput};
/// use picoclaw::error::Result;
///
/// struct PingTool;
///
/// #[async_trait]
/// impl Tool for PingTool {
///     fn name(&self) -> &str { "ping" }
///     fn description(&self) -> &str { "Reply with pong" }
///     fn parameters(&self) -> Value {
///         serde_json::json!({ "type": "object", "properties": {}, "required": [] })
///     }
///     async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
///         Ok(ToolOutput::llm_only("pong"))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name within a registry.
    fn name(&self) -> &str;

    /// Description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// The originating channel (e.g., "telegram", "webhook", "cli")
    pub channel: Option<String>,
    /// The chat/conversation ID within the channel
    pub chat_id: Option<String>,
    /// Workspace scope for tool visibility and memory partitioning
    pub workspace: Option<String>,
    /// Session key of the turn this call belongs to
    pub session_key: Option<String>,
    /// Ambient agent type, used for metric labels
    pub agent_type: AgentType,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel: &str, chat_id: &str) -> Self {
        self.channel = Some(channel.to_string());
        self.chat_id = Some(chat_id.to_string());
        self
    }

    pub fn with_workspace(mut self, workspace: &str) -> Self {
        self.workspace = Some(workspace.to_string());
        self
    }

    pub fn with_session_key(mut self, session_key: &str) -> Self {
        self.session_key = Some(session_key.to_string());
        self
    }

    pub fn with_agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = agent_type;
        self
    }
}
