//! Session types for PicoClaw
//!
//! This module defines the core types for session and conversation
//! management, including messages, roles, and tool calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A conversation session containing messages and metadata.
///
/// Sessions are identified by a session key derived from the routing
/// parameters (see [`crate::session::key`]) and store the full conversation
/// history for one isolated thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session
    pub key: String,
    /// Ordered list of messages in this conversation
    pub messages: Vec<Message>,
    /// When this session was created
    pub created_at: DateTime<Utc>,
    /// When this session was last modified
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a new empty session with the given key.
    ///
    /// # Example
    /// ```
    /// use picoclaw::session::Session;
    ///
    /// let session = Session::new("main:telegram:user:42");
    /// assert!(session.messages.is_empty());
    /// ```
    pub fn new(key: &str) -> Self {
        let now = Utc::now();
        Self {
            key: key.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to this session. Also bumps `updated_at`.
    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Clear all messages from this session.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Rough token estimate over the whole history (4 chars per token).
    ///
    /// Used only for rotation threshold decisions, never billing.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self.messages.iter().map(|m| m.content.chars().count()).sum();
        chars / 4
    }

    /// Age of the session since last activity.
    pub fn idle_duration(&self) -> chrono::Duration {
        Utc::now() - self.updated_at
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender
    pub role: Role,
    /// The text content of the message
    pub content: String,
    /// Tool calls made by the assistant (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// ID of the tool call this message is responding to (for tool results)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Create a new tool result message.
    ///
    /// # Example
    /// ```
    /// use picoclaw::session::{Message, Role};
    ///
    /// let msg = Message::tool_result("call_123", "done");
    /// assert_eq!(msg.role, Role::Tool);
    /// assert_eq!(msg.tool_call_id, Some("call_123".to_string()));
    /// ```
    pub fn tool_result(tool_call_id: &str, content: &str) -> Self {
        Self {
            role: Role::Tool,
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }

    /// Create an assistant message with tool calls attached.
    pub fn assistant_with_tools(content: &str, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .map(|tc| !tc.is_empty())
            .unwrap_or(false)
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool && self.tool_call_id.is_some()
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// JSON-encoded arguments for the tool
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the arguments as a specific type.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let session = Session::new("test-session");
        assert_eq!(session.key, "test-session");
        assert!(session.messages.is_empty());
        assert!(session.created_at <= session.updated_at);
    }

    #[test]
    fn test_session_add_message() {
        let mut session = Session::new("test");
        session.add_message(Message::user("Hello"));
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.last_message().unwrap().role, Role::User);
    }

    #[test]
    fn test_session_clear() {
        let mut session = Session::new("test");
        session.add_message(Message::user("Hello"));
        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn test_estimated_tokens() {
        let mut session = Session::new("test");
        session.add_message(Message::user(&"x".repeat(400)));
        session.add_message(Message::assistant(&"y".repeat(400)));
        assert_eq!(session.estimated_tokens(), 200);
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::system("s").role, Role::System);

        let tool = Message::tool_result("call_1", "ok");
        assert_eq!(tool.role, Role::Tool);
        assert!(tool.is_tool_result());
    }

    #[test]
    fn test_message_with_tool_calls() {
        let tool_call = ToolCall::new("call_1", "search", r#"{"q": "test"}"#);
        let msg = Message::assistant_with_tools("Searching...", vec![tool_call]);

        assert!(msg.has_tool_calls());
        let calls = msg.tool_calls.unwrap();
        assert_eq!(calls[0].name, "search");
    }

    #[test]
    fn test_role_serialize() {
        let json = serde_json::to_string(&Role::User).unwrap();
        assert_eq!(json, r#""user""#);
        let parsed: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Role::User);
    }

    #[test]
    fn test_tool_call_parse_arguments() {
        #[derive(Debug, Deserialize)]
        struct SearchArgs {
            query: String,
        }

        let call = ToolCall::new("call_1", "search", r#"{"query": "rust"}"#);
        let args: SearchArgs = call.parse_arguments().unwrap();
        assert_eq!(args.query, "rust");
    }

    #[test]
    fn test_message_serialization_skips_none() {
        let msg = Message::user("Hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }

    #[test]
    fn test_session_serialization_roundtrip() {
        let mut session = Session::new("test-session");
        session.add_message(Message::user("Hello"));
        session.add_message(Message::assistant("Hi!"));

        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.key, "test-session");
        assert_eq!(parsed.messages.len(), 2);
    }
}
