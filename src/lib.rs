//! PicoClaw - personal/family-scale agent gateway
//!
//! A long-running process that receives user messages from many chat
//! channels, drives a tool-using LLM conversation per session, dispatches
//! tools (built-in, subagent, cron, or external MCP servers), and returns
//! the assistant's reply on the originating channel.

pub mod agent;
pub mod bus;
pub mod cli;
pub mod config;
pub mod cron;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod mcp;
pub mod memory;
pub mod metrics;
pub mod providers;
pub mod safety;
pub mod session;
pub mod subagent;
pub mod tools;

pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use config::Config;
pub use error::{PicoError, Result};
pub use providers::{
    ChatOptions, FallbackChain, LLMProvider, LLMResponse, LLMToolCall, OpenAIProvider,
    ToolDefinition, Usage,
};
pub use session::{Message, Role, Session, SessionManager, ToolCall};
