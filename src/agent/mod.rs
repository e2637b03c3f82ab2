//! Agent module - Core agent logic and conversation handling
//!
//! This module provides the core agent loop and context building
//! functionality for PicoClaw. The agent is responsible for:
//!
//! - Processing inbound messages from the bus, one isolated session per key
//! - Building conversation context (system prompt, safety fragment, memory)
//! - Calling the provider stack for responses
//! - Executing tool calls and feeding results back to the LLM
//! - Rotating sessions into long-term memory
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  MessageBus │────>│  AgentLoop  │────>│ LLMProvider │
//! │  (inbound)  │     │             │     │   (stack)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │   Session   │     │    Tools    │
//!                     │   Manager   │     │  Registry   │
//!                     └─────────────┘     └─────────────┘
//! ```

mod context;
mod r#loop;

pub use context::{ContextBuilder, Skill};
pub use r#loop::AgentLoop;
